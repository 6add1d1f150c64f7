use async_trait::async_trait;
use llmverse_common::Result;

/// An external place where reply text is shown: one message per window,
/// editable in place after creation.
#[async_trait]
pub trait DeliverySurface: Send {
    /// Identifies a created message for later edits.
    type Handle: Send + Sync;

    /// Post a new message holding `text`.
    async fn create(&mut self, text: &str) -> Result<Self::Handle>;

    /// Replace the content of a message created earlier.
    async fn edit(&mut self, handle: &Self::Handle, text: &str) -> Result<()>;

    /// Show a "still working" hint. Failures are not fatal.
    async fn typing(&mut self) -> Result<()> {
        Ok(())
    }
}
