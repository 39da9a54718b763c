use embassy_stm32::can::{BufferedCanSender, Frame};
use haldex_core::{CanFrame, SendError};

/// Write side of the Haldex FDCAN
pub struct HaldexCanSender {
    sender: BufferedCanSender,
}

impl HaldexCanSender {
    /// create a new instance from BufferedCanSender
    pub(super) fn new(sender: BufferedCanSender) -> Self {
        HaldexCanSender { sender }
    }

    /// queue a frame, waiting while the TX buffer is full
    pub async fn send(&mut self, frame: &CanFrame) -> Result<(), SendError> {
        let Some(frame) = frame.to_frame::<Frame>() else {
            return Err(SendError::Bus);
        };
        self.sender.write(frame).await;
        Ok(())
    }
}
