pub mod receiver;
pub mod sender;

use embassy_stm32::can::{self, enums::BusErrorMode, BufferedCan, CanConfigurator, RxBuf, TxBuf};
use haldex_core::{CanFrame, CanPort, SendError};
use static_cell::StaticCell;

const RX_BUF_SIZE: usize = 64;
const TX_BUF_SIZE: usize = 32;

static RX_BUF: StaticCell<RxBuf<RX_BUF_SIZE>> = StaticCell::new();
static TX_BUF: StaticCell<TxBuf<TX_BUF_SIZE>> = StaticCell::new();

/// Native FDCAN controller wired to the Haldex controller, classic frames only
pub struct HaldexCan<'d> {
    interface: BufferedCan<'d, TX_BUF_SIZE, RX_BUF_SIZE>,
    receiver: receiver::HaldexCanReceiver,
    sender: sender::HaldexCanSender,
}

impl<'d> HaldexCan<'d> {
    /// bring the controller into normal mode with every frame accepted into FIFO0
    pub fn new(mut can_configurator: CanConfigurator<'d>, bitrate: u32) -> Self {
        can_configurator.set_config(
            can::config::FdCanConfig::default()
            .set_global_filter(can::config::GlobalFilter::default())
        );
        can_configurator.set_bitrate(bitrate);

        let interface = can_configurator.into_normal_mode()
            .buffered(TX_BUF.init(TxBuf::<TX_BUF_SIZE>::new()), RX_BUF.init(RxBuf::<RX_BUF_SIZE>::new()));

        let receiver = receiver::HaldexCanReceiver::new(interface.reader());
        let sender = sender::HaldexCanSender::new(interface.writer());
        Self { interface, receiver, sender }
    }
}

impl CanPort for HaldexCan<'_> {
    fn try_receive(&mut self) -> Option<CanFrame> {
        self.receiver.try_receive()
    }

    async fn transmit(&mut self, frame: &CanFrame) -> Result<(), SendError> {
        if matches!(self.interface.properties().bus_error_mode(), BusErrorMode::BusOff) {
            return Err(SendError::Bus);
        }
        self.sender.send(frame).await
    }

    async fn recover(&mut self) -> bool {
        // the interrupt handler restarts the peripheral after bus-off, so only report its state
        let mode = self.interface.properties().bus_error_mode();
        defmt::debug!("haldex controller in {}", mode);
        !matches!(mode, BusErrorMode::BusOff)
    }
}
