use crate::model::config::{PairingPolicy, Rounding};
use log::info;

pub fn parse_pairing_policy(s: &str) -> PairingPolicy {
    match s.to_lowercase().as_str() {
        "f" | "fifo" | "first" => PairingPolicy::Fifo,
        "a" | "all" | "close-all" | "closeall" => PairingPolicy::CloseAll,
        other => {
            info!("Unknown pairing policy '{}', defaulting to `fifo`..!", other);
            PairingPolicy::Fifo
        }
    }
}

pub fn parse_rounding(s: &str) -> Rounding {
    match s.to_lowercase().as_str() {
        "r" | "round" | "nearest" => Rounding::Round,
        "f" | "floor" | "down" => Rounding::Floor,
        "c" | "ceil" | "up" => Rounding::Ceil,
        other => {
            info!("Unknown rounding '{}', defaulting to `round`..!", other);
            Rounding::Round
        }
    }
}
