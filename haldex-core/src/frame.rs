use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// owned copy of a classic CAN frame as seen on either bus
///
/// Received frames are copied into this type before any processing, so each
/// pipeline mutates its own value and never a driver buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    /// raw 11 or 29 bit identifier
    pub id: u32,
    pub extended: bool,
    pub remote: bool,
    /// data length code, 0..=8
    pub len: u8,
    pub data: [u8; 8],
}

impl CanFrame {
    /// standard data frame with a full 8 byte payload
    pub const fn standard(id: u16, data: [u8; 8]) -> Self {
        Self { id: id as u32, extended: false, remote: false, len: 8, data }
    }

    /// same frame with a shorter data length code
    pub const fn with_len(mut self, len: u8) -> Self {
        self.len = if len > 8 { 8 } else { len };
        self
    }

    /// bytes actually carried on the wire
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// copy any embedded-can frame into an owned CanFrame
    pub fn from_frame<F: Frame>(frame: &F) -> Self {
        let (id, extended) = match frame.id() {
            Id::Standard(id) => (id.as_raw() as u32, false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        let mut data = [0u8; 8];
        let len = frame.dlc().min(8);
        if !frame.is_remote_frame() {
            let bytes = frame.data();
            let n = bytes.len().min(8);
            data[..n].copy_from_slice(&bytes[..n]);
        }
        Self { id, extended, remote: frame.is_remote_frame(), len: len as u8, data }
    }

    /// build a driver frame, `None` when the identifier does not fit its format
    pub fn to_frame<F: Frame>(&self) -> Option<F> {
        let id: Id = if self.extended {
            ExtendedId::new(self.id)?.into()
        } else {
            StandardId::new(u16::try_from(self.id).ok()?)?.into()
        };
        if self.remote {
            F::new_remote(id, self.len as usize)
        } else {
            F::new(id, self.payload())
        }
    }

    /// equal as far as the bus can tell: header plus the first `len` bytes
    pub fn same_wire_content(&self, other: &CanFrame) -> bool {
        self.id == other.id
            && self.extended == other.extended
            && self.remote == other.remote
            && self.len == other.len
            && self.payload() == other.payload()
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let (id, extended) = match id.into() {
            Id::Standard(id) => (id.as_raw() as u32, false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self { id, extended, remote: false, len: data.len() as u8, data: bytes })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        let mut frame = Self::new(id, &[])?;
        frame.remote = true;
        frame.len = dlc as u8;
        Some(frame)
    }

    fn is_extended(&self) -> bool {
        self.extended
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        if self.extended {
            // masked so an out of range raw value can never panic here
            ExtendedId::new(self.id & 0x1FFF_FFFF).map(Id::Extended).unwrap_or(Id::Extended(ExtendedId::ZERO))
        } else {
            StandardId::new((self.id & 0x7FF) as u16).map(Id::Standard).unwrap_or(Id::Standard(StandardId::ZERO))
        }
    }

    fn dlc(&self) -> usize {
        self.len as usize
    }

    fn data(&self) -> &[u8] {
        if self.remote { &[] } else { self.payload() }
    }
}
