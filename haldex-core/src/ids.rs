//! identifiers of the frames the bridge reads, rewrites or synthesizes

pub const MOTOR1: u32 = 0x280;
pub const MOTOR2: u32 = 0x288;
pub const MOTOR3: u32 = 0x380;
pub const MOTOR5: u32 = 0x480;
pub const MOTOR6: u32 = 0x488;

pub const BRAKES1: u32 = 0x1A0;
pub const BRAKES2: u32 = 0x5A0;
pub const BRAKES3: u32 = 0x4A0;
pub const BRAKES4: u32 = 0x2A0;
pub const BRAKES5: u32 = 0x4A8;
pub const BRAKES9: u32 = 0x0AE;
pub const BRAKES10: u32 = 0x3A0;
pub const BRAKES11: u32 = 0x5B7;

/// coupling controller status, engagement in byte 1, state bits in byte 0
pub const HALDEX: u32 = 0x2C0;

/// steering angle sensor
pub const LW1: u32 = 0x0C2;

pub const KOMBI1: u32 = 0x320;
pub const KOMBI2: u32 = 0x420;
pub const KOMBI3: u32 = 0x520;

pub const GATE_KOMF1: u32 = 0x390;
pub const GATE_KOMF2: u32 = 0x392;
pub const SYSTEMINFO1: u32 = 0x5D0;
pub const SOLL_VERBAULISTE: u32 = 0x5DC;
pub const NMH_GATEWAY: u32 = 0x720;
pub const DIAGNOSE1: u32 = 0x7D0;

/// status frame this bridge broadcasts on the chassis bus
pub const BROADCAST: u32 = 0x6B0;
/// external mode requests, recognised but never acted on
pub const EXTERNAL_CONTROL: u32 = 0x6A0;

/// gateway diagnostic traffic kept flowing in standalone mode
pub const DIAGNOSTICS: [u32; 5] = [0x764, 0x200, 0x710, 0x71D, 0x70F];
