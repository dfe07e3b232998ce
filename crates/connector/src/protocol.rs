//! Parses `* <name>: <value>` protocol command lines and the `PING`/`PONG`
//! heartbeat handshake (§4.10, §6.1).

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolCommand {
    Uuid(String),
    Manufacturer(String),
    SerialNumber(String),
    Station(String),
    Description(String),
    NativeName(String),
    Calibration(String),
    ConversionRequired,
    RelativeTime,
    RealTime,
    Device(String),
    Pong { frequency_ms: u64 },
    Ping,
    Unknown(String),
}

/// Parses one line already known to start with `*`. The leading `*` and a
/// single following space are stripped before matching.
pub fn parse_command(line: &str) -> ProtocolCommand {
    let body = line.strip_prefix('*').unwrap_or(line).trim();

    if body == "PING" {
        return ProtocolCommand::Ping;
    }
    if let Some(rest) = body.strip_prefix("PONG") {
        return match rest.trim().parse::<u64>() {
            Ok(ms) => ProtocolCommand::Pong { frequency_ms: ms },
            Err(_) => ProtocolCommand::Unknown(line.to_string()),
        };
    }
    if body == "conversionRequired" {
        return ProtocolCommand::ConversionRequired;
    }
    if body == "relativeTime" {
        return ProtocolCommand::RelativeTime;
    }
    if body == "realTime" {
        return ProtocolCommand::RealTime;
    }

    let Some((name, value)) = body.split_once(':') else {
        return ProtocolCommand::Unknown(line.to_string());
    };
    let value = value.trim().to_string();

    match name.trim() {
        "uuid" => ProtocolCommand::Uuid(value),
        "manufacturer" => ProtocolCommand::Manufacturer(value),
        "serialNumber" => ProtocolCommand::SerialNumber(value),
        "station" => ProtocolCommand::Station(value),
        "description" => ProtocolCommand::Description(value),
        "nativeName" => ProtocolCommand::NativeName(value),
        "calibration" => ProtocolCommand::Calibration(value),
        "device" => ProtocolCommand::Device(value),
        _ => ProtocolCommand::Unknown(line.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pong_frequency() {
        assert_eq!(parse_command("* PONG 10000"), ProtocolCommand::Pong { frequency_ms: 10000 });
    }

    #[test]
    fn parses_metadata_setters() {
        assert_eq!(parse_command("* uuid: abc-123"), ProtocolCommand::Uuid("abc-123".to_string()));
        assert_eq!(parse_command("* device: Mill01"), ProtocolCommand::Device("Mill01".to_string()));
    }

    #[test]
    fn parses_behaviour_flags() {
        assert_eq!(parse_command("* relativeTime"), ProtocolCommand::RelativeTime);
        assert_eq!(parse_command("* conversionRequired"), ProtocolCommand::ConversionRequired);
    }
}
