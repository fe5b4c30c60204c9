//! Multi-turn conversation driver

use crate::dialog::{DialogContext, DialogHandler};
use crate::session::{CaptureOutcome, DialogSession};
use crate::{Error, Result};

/// How a conversation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEnd {
    /// The backend stopped asking for more; `turns` responses were played
    Completed { turns: usize },
    /// The session was terminated
    Cancelled,
}

impl DialogSession {
    /// Run one hotword-initiated conversation
    ///
    /// Waits for a hotword, then captures and exchanges utterances for as long
    /// as each response expects more dialog. An empty capture or a timed-out
    /// exchange ends the conversation.
    ///
    /// # Errors
    ///
    /// Returns any error from the session's operations
    pub async fn converse(
        &mut self,
        handler: &dyn DialogHandler,
        watch_for: &[&str],
    ) -> Result<ConversationEnd> {
        let Some(trigger) = self.wait_for_trigger(watch_for).await? else {
            return Ok(ConversationEnd::Cancelled);
        };
        tracing::debug!(keyword = %trigger.keyword, "conversation started");

        let mut turns = 0;
        let mut continuation: Option<DialogContext> = None;

        loop {
            let utterance = match self.capture_until_break().await? {
                CaptureOutcome::Utterance(utterance) => utterance,
                CaptureOutcome::Cancelled => return Ok(ConversationEnd::Cancelled),
            };
            if utterance.audio.is_empty() {
                tracing::debug!("empty utterance, ending conversation");
                break;
            }

            let reply = match &continuation {
                None => self.ask(handler, Some(utterance.audio.as_slice())).await?,
                Some(context) => {
                    self.respond_to(handler, Some(utterance.audio.as_slice()), Some(context))
                        .await?
                }
            };
            let Some(response) = reply else {
                if self.is_terminated() {
                    return Ok(ConversationEnd::Cancelled);
                }
                break;
            };

            turns += 1;
            self.play(&response).await?;

            match response.continuation {
                Some(context) => continuation = Some(context),
                None => break,
            }
        }

        tracing::info!(turns, "conversation finished");
        Ok(ConversationEnd::Completed { turns })
    }

    /// Listen and hold conversations until the session is terminated
    ///
    /// Backend failures end the current conversation but not the loop.
    ///
    /// # Errors
    ///
    /// Returns configuration, usage, audio and engine errors
    pub async fn run(&mut self, handler: &dyn DialogHandler, watch_for: &[&str]) -> Result<()> {
        self.listen()?;

        loop {
            match self.converse(handler, watch_for).await {
                Ok(ConversationEnd::Completed { .. }) => {}
                Ok(ConversationEnd::Cancelled) => break,
                Err(e @ (Error::Dialog(_) | Error::Http(_))) => {
                    tracing::warn!(error = %e, "dialog exchange failed");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
