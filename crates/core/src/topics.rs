// Topic layout helpers for the controller namespace:
//
//   <prefix><kind>/<client_id>[/<suffix>]
//
// plus the two fixed-segment topics `<prefix><client_id>/lwt` and
// `<prefix><client_id>/cmnd`.

use std::fmt;

pub const CONFIG: &str = "conf";
pub const COMMAND: &str = "cmnd";
pub const STATUS: &str = "stat";
pub const TELEMETRY: &str = "tele";
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

pub const LWT_SEGMENT: &str = "lwt";
pub const ADOPT_SEGMENT: &str = "adopt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Config,
    Command,
    Status,
    Telemetry,
    Adopt,
    LastWill,
    Wildcard,
}

impl TopicKind {
    /// The kind segment as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            TopicKind::Config => CONFIG,
            TopicKind::Command => COMMAND,
            TopicKind::Status | TopicKind::Adopt => STATUS,
            TopicKind::Telemetry => TELEMETRY,
            TopicKind::LastWill => LWT_SEGMENT,
            TopicKind::Wildcard => SINGLE_LEVEL_WILDCARD,
        }
    }

    /// Recover an inbound kind from the first segment after the prefix.
    /// Matching is by prefix so `config` is accepted as well as `conf`.
    pub fn from_segment(segment: &str) -> Option<Self> {
        if segment.starts_with(CONFIG) {
            Some(TopicKind::Config)
        } else if segment.starts_with(COMMAND) {
            Some(TopicKind::Command)
        } else if segment.starts_with(STATUS) {
            Some(TopicKind::Status)
        } else if segment.starts_with(TELEMETRY) {
            Some(TopicKind::Telemetry)
        } else {
            None
        }
    }

    pub fn retained(self) -> bool {
        matches!(self, TopicKind::Status | TopicKind::Adopt | TopicKind::LastWill)
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ensure a non-empty prefix ends in exactly one trailing `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

/// Canonical topic for `kind`. Pure: equal inputs always give equal strings.
pub fn topic(kind: TopicKind, client_id: &str, prefix: &str, suffix: &str) -> String {
    let prefix = normalize_prefix(prefix);
    match kind {
        TopicKind::LastWill => format!("{}{}/{}", prefix, client_id, LWT_SEGMENT),
        TopicKind::Adopt => format!("{}{}/{}/{}", prefix, STATUS, client_id, ADOPT_SEGMENT),
        TopicKind::Wildcard => with_suffix(format!("{}{}/{}", prefix, SINGLE_LEVEL_WILDCARD, SINGLE_LEVEL_WILDCARD), suffix),
        _ => with_suffix(format!("{}{}/{}", prefix, kind.as_str(), client_id), suffix),
    }
}

fn with_suffix(base: String, suffix: &str) -> String {
    if suffix.is_empty() { base } else { format!("{}/{}", base, suffix) }
}

/// A device's topic namespace: prefix, client id and optional suffix bound together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    client_id: String,
    suffix: String,
}

impl Topics {
    pub fn new(prefix: &str, client_id: &str, suffix: &str) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
            client_id: client_id.to_string(),
            suffix: suffix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str { &self.prefix }
    pub fn client_id(&self) -> &str { &self.client_id }
    pub fn suffix(&self) -> &str { &self.suffix }

    pub fn topic(&self, kind: TopicKind) -> String {
        topic(kind, &self.client_id, &self.prefix, &self.suffix)
    }

    pub fn config(&self) -> String { self.topic(TopicKind::Config) }
    pub fn command(&self) -> String { self.topic(TopicKind::Command) }
    pub fn status(&self) -> String { self.topic(TopicKind::Status) }
    pub fn telemetry(&self) -> String { self.topic(TopicKind::Telemetry) }
    pub fn adopt(&self) -> String { self.topic(TopicKind::Adopt) }
    pub fn last_will(&self) -> String { self.topic(TopicKind::LastWill) }

    /// Legacy `<prefix><client_id>/cmnd` command topic.
    pub fn compat_command(&self) -> String {
        format!("{}{}/{}", self.prefix, self.client_id, COMMAND)
    }

    /// `<prefix><kind>/+`: every device publishing under `kind`.
    pub fn wildcard_for(&self, kind: TopicKind) -> String {
        format!("{}{}/{}", self.prefix, kind.as_str(), SINGLE_LEVEL_WILDCARD)
    }

    /// Strip the prefix and return the kind named by the first segment.
    pub fn kind_of(&self, topic: &str) -> Option<TopicKind> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        let segment = rest.split('/').find(|s| !s.is_empty())?;
        TopicKind::from_segment(segment)
    }
}
