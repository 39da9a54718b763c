//! chassis signals of the VW PQ platform the bridge can decode

use super::{DbcSignal, Mux};

const fn intel(frame_id: u32, name: &'static str, start_bit: u16, length: u8, scale: f32, unit: &'static str) -> DbcSignal {
    DbcSignal {
        frame_id,
        name,
        start_bit,
        length,
        little_endian: true,
        signed: false,
        scale,
        offset: 0.0,
        min: 0.0,
        max: scale * ((1u64 << length) - 1) as f32,
        unit,
        mux: Mux::None,
    }
}

const fn signed(mut signal: DbcSignal) -> DbcSignal {
    signal.signed = true;
    signal.min = -signal.max / 2.0;
    signal.max /= 2.0;
    signal
}

const fn muxed(mut signal: DbcSignal, mux: Mux) -> DbcSignal {
    signal.mux = mux;
    signal
}

const fn offset(mut signal: DbcSignal, offset: f32) -> DbcSignal {
    signal.offset = offset;
    signal.min += offset;
    signal.max += offset;
    signal
}

pub static SIGNALS: [DbcSignal; 33] = [
    // Motor_1
    intel(0x280, "Idle_Info", 0, 1, 1.0, ""),
    intel(0x280, "Kickdown", 1, 1, 1.0, ""),
    intel(0x280, "Inner_Torque", 8, 8, 0.39, "%"),
    intel(0x280, "EngineRPM", 16, 16, 0.25, "rpm"),
    intel(0x280, "Inner_Torque_Without_Intervention", 32, 8, 0.39, "%"),
    intel(0x280, "Pedal_Value", 40, 8, 0.4, "%"),
    intel(0x280, "Mechanical_Loss_Torque", 48, 8, 0.39, "%"),
    intel(0x280, "Driver_Requested_Torque", 56, 8, 0.39, "%"),
    // Motor_2
    intel(0x288, "Info_Code", 0, 2, 1.0, ""),
    offset(intel(0x288, "Coolant_Temperature", 8, 8, 0.75, "C"), -48.0),
    intel(0x288, "Brake_Light_Switch", 16, 1, 1.0, ""),
    intel(0x288, "Vehicle_Speed", 24, 8, 1.28, "km/h"),
    intel(0x288, "Cruise_Target_Speed", 32, 8, 1.28, "km/h"),
    // Motor_3
    offset(intel(0x380, "Intake_Air_Temperature", 8, 8, 0.75, "C"), -48.0),
    intel(0x380, "Pedal_Value_Raw", 16, 8, 0.4, "%"),
    intel(0x380, "Throttle_Angle", 56, 8, 0.4, "%"),
    // Motor_5
    muxed(intel(0x480, "Mux_Info", 0, 2, 1.0, ""), Mux::Selector),
    muxed(intel(0x480, "Boost_Pressure", 8, 8, 10.0, "hPa"), Mux::Value(1)),
    muxed(intel(0x480, "Fuel_Consumption", 8, 15, 1.0, "ul"), Mux::Value(2)),
    // Bremse_1
    intel(0x1A0, "ASR_Request", 0, 1, 1.0, ""),
    intel(0x1A0, "MSR_Request", 1, 1, 1.0, ""),
    intel(0x1A0, "ABS_Intervention", 2, 1, 1.0, ""),
    intel(0x1A0, "BR1_Wheel_Speed_kmh", 17, 15, 0.01, "km/h"),
    intel(0x1A0, "ASR_Torque_Request", 32, 8, 0.39, "%"),
    intel(0x1A0, "BR1_Counter", 56, 4, 1.0, ""),
    // Bremse_3
    intel(0x4A0, "Wheel_Speed_FL", 1, 15, 0.01, "km/h"),
    intel(0x4A0, "Wheel_Speed_FR", 17, 15, 0.01, "km/h"),
    intel(0x4A0, "Wheel_Speed_RL", 33, 15, 0.01, "km/h"),
    intel(0x4A0, "Wheel_Speed_RR", 49, 15, 0.01, "km/h"),
    // Lenkwinkel_1
    intel(0x0C2, "Steering_Angle", 0, 15, 0.04375, "deg"),
    intel(0x0C2, "Steering_Angle_Sign", 15, 1, 1.0, ""),
    signed(intel(0x0C2, "Steering_Rate", 16, 16, 0.04375, "deg/s")),
    // Haldex
    intel(0x2C0, "Coupling_Engagement", 8, 8, 1.0, ""),
];
