//! Session state machine integration tests
//!
//! Audio is replayed from a spawned task on a paused clock, so poll counts and
//! timings are deterministic.

use std::time::Duration;

use wakeloop::config::BufferConfig;
use wakeloop::{
    CaptureOutcome, ConversationEnd, DialogContext, EngineOutput, ResponseAudio, SessionState,
    UtteranceEnd,
};

mod common;

use common::{
    RecordingSink, ScriptedEngine, ScriptedHandler, continuing, final_response,
    generate_silence_pcm, replay, session, speech,
};

fn unbounded() -> BufferConfig {
    BufferConfig {
        snapshot_ms: 120,
        max_capture_ms: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_requires_listening() {
    let mut session = session(
        replay(&speech(100)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );

    let err = session.wait_for_trigger(&[]).await.unwrap_err();
    assert!(err.is_usage());

    let err = session.capture_until_break().await.unwrap_err();
    assert!(err.is_usage());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_after_three_empty_polls() {
    // First audio lands at 25 ms; polls at 0, 10 and 20 ms find nothing
    let source = replay(&speech(20)).with_start_delay(Duration::from_millis(25));
    let mut session = session(
        source,
        ScriptedEngine::new([EngineOutput::Hotword(1)]),
        &["computer"],
        unbounded(),
        RecordingSink::default(),
    );

    session.listen().unwrap();
    let trigger = session.wait_for_trigger(&[]).await.unwrap().unwrap();

    assert_eq!(trigger.keyword, "computer");
    assert_eq!(trigger.index.get(), 1);
    assert_eq!(session.stats().idle_polls, 3);
    assert_eq!(session.stats().triggers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unwatched_and_unmapped_hotwords_are_ignored() {
    let engine = ScriptedEngine::new([
        EngineOutput::Hotword(1),
        EngineOutput::Hotword(7),
        EngineOutput::Silence,
        EngineOutput::Hotword(2),
    ])
    .with_hotwords(2);
    let mut session = session(
        replay(&speech(200)),
        engine,
        &["alpha", "beta"],
        unbounded(),
        RecordingSink::default(),
    );

    session.listen().unwrap();
    let trigger = session.wait_for_trigger(&["beta"]).await.unwrap().unwrap();
    assert_eq!(trigger.keyword, "beta");
    assert_eq!(trigger.index.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_watched_keyword_is_usage_error() {
    let mut session = session(
        replay(&speech(20)),
        ScriptedEngine::idle(),
        &["computer"],
        unbounded(),
        RecordingSink::default(),
    );

    session.listen().unwrap();
    let err = session.wait_for_trigger(&["jarvis"]).await.unwrap_err();
    assert!(err.is_usage());
}

#[tokio::test(start_paused = true)]
async fn test_capture_ends_on_break() {
    let mut pcm = speech(200);
    pcm.extend(generate_silence_pcm(300));
    let mut session = session(
        replay(&pcm),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );

    session.listen().unwrap();
    let CaptureOutcome::Utterance(utterance) = session.capture_until_break().await.unwrap() else {
        panic!("capture was cancelled");
    };

    assert_eq!(utterance.ended_by, UtteranceEnd::Break);
    // 200 ms of speech plus the 200 ms silence run
    let format = session.format();
    assert_eq!(format.ms_for_bytes(utterance.audio.len()), 400);
    assert_eq!(session.context().last_capture.as_ref(), Some(&utterance.audio));
    assert_eq!(session.state(), SessionState::AwaitingHotword);
}

#[tokio::test(start_paused = true)]
async fn test_capture_truncated_at_capacity_without_break() {
    let buffer = BufferConfig {
        snapshot_ms: 120,
        max_capture_ms: Some(100),
    };
    let mut session = session(
        replay(&speech(1000)),
        ScriptedEngine::idle(),
        &[],
        buffer,
        RecordingSink::default(),
    );

    session.listen().unwrap();
    let CaptureOutcome::Utterance(utterance) = session.capture_until_break().await.unwrap() else {
        panic!("capture was cancelled");
    };

    assert_eq!(utterance.ended_by, UtteranceEnd::MaxDuration);
    assert_eq!(utterance.audio.len(), session.format().bytes_for_ms(100));
    assert_eq!(session.stats().captures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_from_another_task_cancels_capture() {
    let mut session = session(
        replay(&speech(5000)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );
    session.listen().unwrap();

    let handle = session.handle();
    let terminate_at = Duration::from_millis(95);
    tokio::spawn(async move {
        tokio::time::sleep(terminate_at).await;
        handle.terminate();
    });

    let start = tokio::time::Instant::now();
    let outcome = session.capture_until_break().await.unwrap();

    assert_eq!(outcome, CaptureOutcome::Cancelled);
    assert!(start.elapsed() <= terminate_at + common::POLL);
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(!session.is_listening());
    assert!(session.context().last_capture.is_none());

    // The session no longer listens
    assert!(session.wait_for_trigger(&[]).await.unwrap_err().is_usage());
    assert!(session.capture_until_break().await.unwrap_err().is_usage());
    assert!(session.listen().unwrap_err().is_usage());
}

#[tokio::test(start_paused = true)]
async fn test_pending_termination_is_a_cancellation() {
    let mut session = session(
        replay(&speech(100)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );
    session.listen().unwrap();

    // Requested through a handle but not yet seen by the session
    session.handle().terminate();
    assert!(session.wait_for_trigger(&[]).await.unwrap().is_none());
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(session.wait_for_trigger(&[]).await.unwrap_err().is_usage());
}

#[tokio::test(start_paused = true)]
async fn test_terminated_state_is_final() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let mut session = session(
        replay(&speech(100)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        sink,
    );
    let handler = ScriptedHandler::new([final_response()]);
    session.listen().unwrap();
    session.terminate();

    session.play(&final_response()).await.unwrap();
    assert_eq!(played.lock().unwrap().len(), 1);
    assert_eq!(session.state(), SessionState::Terminated);

    assert!(session.ask(&handler, Some(&[1, 2][..])).await.unwrap().is_none());
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(!session.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_ask_defaults_to_last_capture() {
    let mut pcm = speech(100);
    pcm.extend(generate_silence_pcm(200));
    let mut session = session(
        replay(&pcm),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );
    let handler = ScriptedHandler::new([final_response()]);

    assert!(session.ask(&handler, None).await.unwrap_err().is_usage());

    session.listen().unwrap();
    let CaptureOutcome::Utterance(utterance) = session.capture_until_break().await.unwrap() else {
        panic!("capture was cancelled");
    };
    let response = session.ask(&handler, None).await.unwrap().unwrap();

    assert_eq!(response, final_response());
    assert_eq!(handler.calls.lock().unwrap()[0].audio_len, utterance.audio.len());

    // A final response leaves nothing to continue
    let err = session.respond_to(&handler, None, None).await.unwrap_err();
    assert!(err.is_usage());
}

#[tokio::test(start_paused = true)]
async fn test_respond_to_uses_given_or_remembered_context() {
    let mut session = session(
        replay(&speech(20)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );
    let handler = ScriptedHandler::new([continuing("turn-2"), final_response(), final_response()]);

    session.ask(&handler, Some(&[1, 2][..])).await.unwrap().unwrap();
    assert_eq!(
        session.context().continuation(),
        Some(&DialogContext::new("turn-2"))
    );

    session.respond_to(&handler, Some(&[3][..]), None).await.unwrap().unwrap();
    session
        .respond_to(&handler, Some(&[4][..]), Some(&DialogContext::new("explicit")))
        .await
        .unwrap()
        .unwrap();

    let calls = handler.calls.lock().unwrap();
    assert_eq!(calls[0].context, None);
    assert_eq!(calls[1].context.as_deref(), Some("turn-2"));
    assert_eq!(calls[2].context.as_deref(), Some("explicit"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_times_out() {
    let mut session = session(
        replay(&speech(20)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );
    let handler =
        ScriptedHandler::new([final_response()]).with_delay(Duration::from_secs(5));

    let response = session.ask(&handler, Some(&[0; 32][..])).await.unwrap();
    assert!(response.is_none());
    assert!(session.context().last_response.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_play_hands_audio_to_sink() {
    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let mut session = session(
        replay(&speech(20)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        sink,
    );

    session.play(&final_response()).await.unwrap();
    session
        .play(&wakeloop::Response::new(ResponseAudio::Wav(Vec::new())))
        .await
        .unwrap();

    // Empty audio is skipped
    assert_eq!(played.lock().unwrap().as_slice(), &[final_response().audio]);
}

#[tokio::test(start_paused = true)]
async fn test_multi_turn_conversation() {
    // Hotword chunk, then two utterances each followed by a 200 ms pause
    let mut pcm = speech(200);
    pcm.extend(generate_silence_pcm(200));
    pcm.extend(speech(200));
    pcm.extend(generate_silence_pcm(200));

    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let mut session = session(
        replay(&pcm),
        ScriptedEngine::new([EngineOutput::Hotword(1)]),
        &[],
        unbounded(),
        sink,
    );
    let handler = ScriptedHandler::new([continuing("more"), final_response()]);

    session.listen().unwrap();
    let end = session.converse(&handler, &[]).await.unwrap();

    assert_eq!(end, ConversationEnd::Completed { turns: 2 });
    assert_eq!(played.lock().unwrap().len(), 2);

    let calls = handler.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].context, None);
    assert_eq!(calls[1].context.as_deref(), Some("more"));
    assert_eq!(session.stats().captures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_converse_cancelled_while_waiting() {
    let mut session = session(
        replay(&generate_silence_pcm(20)),
        ScriptedEngine::idle(),
        &[],
        unbounded(),
        RecordingSink::default(),
    );
    let handler = ScriptedHandler::default();
    session.listen().unwrap();

    let handle = session.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.terminate();
    });

    let end = session.converse(&handler, &[]).await.unwrap();
    assert_eq!(end, ConversationEnd::Cancelled);
    assert!(handler.calls.lock().unwrap().is_empty());
}
