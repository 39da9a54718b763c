use embassy_stm32::can::BufferedCanReceiver;
use haldex_core::CanFrame;

/// Read side of the Haldex FDCAN
pub struct HaldexCanReceiver {
    receiver: BufferedCanReceiver,
}

impl HaldexCanReceiver {
    /// create a new instance from BufferedCanReceiver
    pub(super) fn new(receiver: BufferedCanReceiver) -> Self {
        HaldexCanReceiver { receiver }
    }

    /// next buffered frame, skipping bus error entries
    pub fn try_receive(&mut self) -> Option<CanFrame> {
        loop {
            match self.receiver.try_receive().ok()? {
                Ok(envelope) => return Some(CanFrame::from_frame(&envelope.frame)),
                Err(e) => defmt::trace!("haldex bus error: {}", e),
            }
        }
    }
}
