//! OSC message model
//!
//! Thin wrapper around `rosc` covering the argument types the avatar
//! protocol actually uses: booleans, floats, integers and strings.

use rosc::{decoder, encoder, OscPacket, OscType};

use crate::error::{Error, Result};

/// A single OSC message: address pattern plus positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    /// OSC address pattern, e.g. `/avatar/parameters/ShockOsc/Leg`
    pub address: String,
    /// Positional arguments
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// First argument, if any.
    pub fn arg(&self) -> Option<&OscArg> {
        self.args.first()
    }
}

/// OSC argument types used by the avatar parameter protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Bool(bool),
    Float(f32),
    Int(i32),
    String(String),
}

impl From<bool> for OscArg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl OscArg {
    fn to_rosc_type(&self) -> OscType {
        match self {
            Self::Bool(v) => OscType::Bool(*v),
            Self::Float(v) => OscType::Float(*v),
            Self::Int(v) => OscType::Int(*v),
            Self::String(v) => OscType::String(v.clone()),
        }
    }

    fn from_rosc_type(t: &OscType) -> Option<Self> {
        match t {
            OscType::Bool(v) => Some(Self::Bool(*v)),
            OscType::Float(v) => Some(Self::Float(*v)),
            OscType::Double(v) => Some(Self::Float(*v as f32)),
            OscType::Int(v) => Some(Self::Int(*v)),
            OscType::Long(v) => Some(Self::Int(*v as i32)),
            OscType::String(v) => Some(Self::String(v.clone())),
            _ => None,
        }
    }

    /// Loose boolean coercion: avatar toggles arrive as bool, int or float
    /// depending on the parameter's declared type.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(v) => *v,
            Self::Float(v) => *v > 0.0,
            Self::Int(v) => *v != 0,
            Self::String(_) => false,
        }
    }

    /// Loose float coercion, mirrors [`OscArg::as_bool`].
    pub fn as_float(&self) -> f32 {
        match self {
            Self::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Float(v) => *v,
            Self::Int(v) => *v as f32,
            Self::String(_) => 0.0,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Encode a message into a UDP-ready OSC packet.
pub fn encode(message: &OscMessage) -> Result<Vec<u8>> {
    let packet = OscPacket::Message(rosc::OscMessage {
        addr: message.address.clone(),
        args: message.args.iter().map(OscArg::to_rosc_type).collect(),
    });
    encoder::encode(&packet).map_err(|e| Error::OscEncode(format!("{e:?}")))
}

/// Decode a UDP datagram into a message.
///
/// Bundles are flattened to their first contained message; arguments of
/// unsupported types are skipped.
pub fn decode(buf: &[u8]) -> Result<Option<OscMessage>> {
    let (_, packet) = decoder::decode_udp(buf)?;
    Ok(first_message(packet))
}

fn first_message(packet: OscPacket) -> Option<OscMessage> {
    match packet {
        OscPacket::Message(msg) => Some(OscMessage {
            address: msg.addr,
            args: msg.args.iter().filter_map(OscArg::from_rosc_type).collect(),
        }),
        OscPacket::Bundle(bundle) => bundle.content.into_iter().find_map(first_message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_conversion() {
        assert!(matches!(OscArg::from(0.5f32), OscArg::Float(_)));
        assert!(matches!(OscArg::from(true), OscArg::Bool(true)));
        assert!(matches!(OscArg::from("hi"), OscArg::String(_)));
    }

    #[test]
    fn bool_coercion() {
        assert!(OscArg::Float(0.3).as_bool());
        assert!(!OscArg::Float(0.0).as_bool());
        assert!(OscArg::Int(1).as_bool());
        assert!(!OscArg::Bool(false).as_bool());
    }

    #[test]
    fn roundtrip() {
        let msg = OscMessage::new(
            "/avatar/parameters/ShockOsc/Leg",
            vec![OscArg::Bool(true)],
        );
        let bytes = encode(&msg).unwrap();
        let back = decode(&bytes).unwrap().unwrap();
        assert_eq!(back, msg);
    }
}
