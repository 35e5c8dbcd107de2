//! Inbound address parsing
//!
//! Turns raw OSC address patterns into structured routes. Group parameters
//! live under the reserved `ShockOsc/` namespace and carry an action suffix
//! after the last underscore; remote-config traffic sits under the
//! `_Config/` sub-prefix of the same namespace.

/// Prefix of all avatar parameters.
pub const PARAM_PREFIX: &str = "/avatar/parameters/";
/// Reserved namespace of this bridge within the parameter space.
pub const NAMESPACE: &str = "ShockOsc/";
/// Sub-prefix routed to the remote-config sub-protocol.
pub const CONFIG_SUB_PREFIX: &str = "_Config/";
/// Output-only aggregate pseudo-group; silently ignored on input.
pub const ANY_PSEUDO_GROUP: &str = "_Any";

/// Recognized action suffixes of a group parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    /// Primary manual trigger (no suffix).
    Trigger,
    /// Physbone pull amount, 0..1.
    Stretch,
    IsGrabbed,
    /// Published state, ignored on input.
    Cooldown,
    Active,
    CooldownPercentage,
    Intensity,
    /// Instant one-shot triggers.
    IShock,
    IVibrate,
    ISound,
    /// Continuous streaming, value is the intensity 0..1.
    CShock,
    CVibrate,
    CSound,
    /// One-shot overrides consumed by the next dispatch.
    NextIntensity,
    NextDuration,
}

impl GroupAction {
    fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "Stretch" => Self::Stretch,
            "IsGrabbed" => Self::IsGrabbed,
            "Cooldown" => Self::Cooldown,
            "Active" => Self::Active,
            "CooldownPercentage" => Self::CooldownPercentage,
            "Intensity" => Self::Intensity,
            "IShock" => Self::IShock,
            "IVibrate" => Self::IVibrate,
            "ISound" => Self::ISound,
            "CShock" => Self::CShock,
            "CVibrate" => Self::CVibrate,
            "CSound" => Self::CSound,
            "NextIntensity" => Self::NextIntensity,
            "NextDuration" => Self::NextDuration,
            _ => return None,
        })
    }

    /// Published state echoes back from the game; never acted on.
    pub fn is_output_only(self) -> bool {
        matches!(
            self,
            Self::Cooldown | Self::Active | Self::CooldownPercentage | Self::Intensity
        )
    }
}

/// A structured inbound address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAddress<'a> {
    /// `/avatar/change`, argument is the new avatar id.
    AvatarChange,
    /// `/avatar/parameters/AFK`
    Afk,
    /// `/avatar/parameters/MuteSelf`
    MuteSelf,
    /// A group parameter in the reserved namespace.
    Group { name: &'a str, action: GroupAction },
    /// A remote-config address; at most two path segments.
    Config { segments: Vec<&'a str> },
    /// Any other avatar-scoped parameter; cached, never acted on.
    AvatarParam(&'a str),
    /// Outside the avatar parameter space entirely.
    Other,
}

pub fn parse(address: &str) -> ParsedAddress<'_> {
    if address == "/avatar/change" {
        return ParsedAddress::AvatarChange;
    }
    let Some(param) = address.strip_prefix(PARAM_PREFIX) else {
        return ParsedAddress::Other;
    };
    match param {
        "AFK" => return ParsedAddress::Afk,
        "MuteSelf" => return ParsedAddress::MuteSelf,
        _ => {}
    }
    let Some(rest) = param.strip_prefix(NAMESPACE) else {
        return ParsedAddress::AvatarParam(param);
    };
    if let Some(config) = rest.strip_prefix(CONFIG_SUB_PREFIX) {
        return ParsedAddress::Config {
            segments: config.split('/').collect(),
        };
    }
    // `{group}_{action}`, split at the last underscore so group names may
    // themselves contain underscores. An unrecognized suffix means the
    // whole remainder is the group name and the action is the primary
    // trigger boolean.
    match rest.rsplit_once('_') {
        Some((name, suffix)) => match GroupAction::from_suffix(suffix) {
            Some(action) => ParsedAddress::Group { name, action },
            None => ParsedAddress::Group {
                name: rest,
                action: GroupAction::Trigger,
            },
        },
        None => ParsedAddress::Group {
            name: rest,
            action: GroupAction::Trigger,
        },
    }
}
