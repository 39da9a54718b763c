use defmt::{Debug2Format, debug, trace, warn};
use embassy_futures::yield_now;
use embassy_time::Delay;
use embedded_hal::spi::SpiDevice;
use haldex_core::{CanFrame, CanPort, SendError};
use mcp2515::{MCP2515, Settings, error::Error, frame::CanFrame as McpFrame};

/// MCP2515 on SPI, wired to the vehicle chassis bus
pub struct McpCan<SPI> {
    mcp: MCP2515<SPI>,
    settings: Settings,
}

impl<SPI: SpiDevice> McpCan<SPI> {
    /// reset and configure the chip, returning whether it came up
    pub fn new(spi: SPI, settings: Settings) -> (Self, bool) {
        let mut can = Self { mcp: MCP2515::new(spi), settings };
        let ready = can.init();
        (can, ready)
    }

    fn init(&mut self) -> bool {
        match self.mcp.init(&mut Delay, self.settings) {
            Ok(()) => true,
            Err(e) => {
                warn!("mcp2515 init failed: {}", Debug2Format(&e));
                false
            }
        }
    }
}

impl<SPI: SpiDevice> CanPort for McpCan<SPI> {
    fn try_receive(&mut self) -> Option<CanFrame> {
        match self.mcp.read_message() {
            Ok(frame) => Some(CanFrame::from_frame(&frame)),
            Err(Error::NoMessage) => None,
            Err(e) => {
                trace!("mcp2515 read failed: {}", Debug2Format(&e));
                None
            }
        }
    }

    async fn transmit(&mut self, frame: &CanFrame) -> Result<(), SendError> {
        let Some(frame) = frame.to_frame::<McpFrame>() else {
            return Err(SendError::Bus);
        };
        // retried until the caller's send timeout fires
        loop {
            match self.mcp.send_message(frame) {
                Ok(()) => return Ok(()),
                Err(Error::TxBusy) => yield_now().await,
                Err(_) => return Err(SendError::Bus),
            }
        }
    }

    async fn recover(&mut self) -> bool {
        debug!("reinitialising mcp2515");
        self.init()
    }
}
