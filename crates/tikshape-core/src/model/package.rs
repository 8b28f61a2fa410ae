// ── Bandwidth package domain types ──

use serde::{Deserialize, Serialize};
use tikshape_api::{Burst, Rate};

use super::PackageId;

/// Traffic direction of a queue node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Download, Direction::Upload];

    /// Prefix carried by upload queue names and packet marks.
    pub const UPLOAD_PREFIX: &'static str = "UP-";

    /// Device-side name for `base` in this direction: `base` or `UP-base`.
    pub fn qualify(self, base: &str) -> String {
        match self {
            Self::Download => base.to_owned(),
            Self::Upload => format!("{}{base}", Self::UPLOAD_PREFIX),
        }
    }
}

/// Per-client queue settings of a package, one per direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildQueueTemplate {
    pub limit: Option<Rate>,
    pub limit_at: Option<Rate>,
    pub burst_limit: Option<Rate>,
    pub burst_threshold: Option<Rate>,
    pub burst_time: Option<String>,
    pub queue_type: Option<String>,
    pub priority: Option<u8>,
}

impl ChildQueueTemplate {
    fn burst(&self) -> Option<Burst> {
        Some(Burst {
            limit: self.burst_limit?,
            threshold: self.burst_threshold?,
            time: self.burst_time.clone().filter(|t| !t.trim().is_empty())?,
        })
    }
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

/// A sellable bandwidth tier. `name` is unique and doubles as the
/// download parent queue name on the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthPackage {
    pub id: PackageId,
    pub name: String,

    // Upstream placement (empty: attach to the root)
    #[serde(default)]
    pub parent_download: String,
    #[serde(default)]
    pub parent_upload: String,

    // Package-level limits
    pub max_limit_download: Rate,
    pub max_limit_upload: Rate,
    #[serde(default)]
    pub limit_at_download: Option<Rate>,
    #[serde(default)]
    pub limit_at_upload: Option<Rate>,

    // Sharing
    #[serde(default = "one")]
    pub max_clients: u32,
    #[serde(default)]
    pub shared_download: Option<Rate>,
    #[serde(default)]
    pub shared_upload: Option<Rate>,

    // Child templates
    #[serde(default)]
    pub child_download: ChildQueueTemplate,
    #[serde(default)]
    pub child_upload: ChildQueueTemplate,

    #[serde(default = "yes")]
    pub active: bool,
}

/// Limits a child queue is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChildLimits {
    pub max_limit: Rate,
    pub limit_at: Option<Rate>,
}

impl BandwidthPackage {
    pub fn new(id: PackageId, name: impl Into<String>, download: Rate, upload: Rate) -> Self {
        Self {
            id,
            name: name.into(),
            parent_download: String::new(),
            parent_upload: String::new(),
            max_limit_download: download,
            max_limit_upload: upload,
            limit_at_download: None,
            limit_at_upload: None,
            max_clients: 1,
            shared_download: None,
            shared_upload: None,
            child_download: ChildQueueTemplate::default(),
            child_upload: ChildQueueTemplate::default(),
            active: true,
        }
    }

    /// Parent queue name on the router for `direction`.
    pub fn queue_name(&self, direction: Direction) -> String {
        direction.qualify(&self.name)
    }

    /// Configured upstream parent, `None` when unset.
    pub fn upstream_parent(&self, direction: Direction) -> Option<&str> {
        let parent = match direction {
            Direction::Download => &self.parent_download,
            Direction::Upload => &self.parent_upload,
        };
        Some(parent.trim()).filter(|p| !p.is_empty())
    }

    pub fn max_limit(&self, direction: Direction) -> Rate {
        match direction {
            Direction::Download => self.max_limit_download,
            Direction::Upload => self.max_limit_upload,
        }
    }

    pub fn limit_at(&self, direction: Direction) -> Option<Rate> {
        match direction {
            Direction::Download => self.limit_at_download,
            Direction::Upload => self.limit_at_upload,
        }
    }

    pub fn shared_limit(&self, direction: Direction) -> Option<Rate> {
        match direction {
            Direction::Download => self.shared_download,
            Direction::Upload => self.shared_upload,
        }
    }

    pub fn child(&self, direction: Direction) -> &ChildQueueTemplate {
        match direction {
            Direction::Download => &self.child_download,
            Direction::Upload => &self.child_upload,
        }
    }

    /// Burst settings for a child queue. Applied only when the package
    /// defines a complete burst triple for both directions.
    pub fn burst(&self, direction: Direction) -> Option<Burst> {
        let download = self.child_download.burst()?;
        let upload = self.child_upload.burst()?;
        Some(match direction {
            Direction::Download => download,
            Direction::Upload => upload,
        })
    }

    /// Effective child limits for `direction`.
    ///
    /// `max = override ?? child.limit ?? shared ?? max_limit` and
    /// `limit_at = override ?? child.limit_at ?? max / max_clients`, the
    /// last only when the package is shared between several clients.
    pub fn child_limits(
        &self,
        direction: Direction,
        max_override: Option<Rate>,
        limit_at_override: Option<Rate>,
    ) -> ChildLimits {
        let child = self.child(direction);
        let max_limit = max_override
            .or(child.limit)
            .or(self.shared_limit(direction))
            .unwrap_or_else(|| self.max_limit(direction));
        let limit_at = limit_at_override.or(child.limit_at).or_else(|| {
            (self.max_clients > 1).then(|| max_limit.divide(self.max_clients))
        });
        ChildLimits {
            max_limit,
            limit_at,
        }
    }
}

/// Split a rate string evenly between `max_clients`, flooring the
/// magnitude and keeping the unit: `fair_share("10M", 3) == "3M"`.
///
/// Unparseable input or `max_clients <= 1` returns the input unchanged.
pub fn fair_share(limit: &str, max_clients: u32) -> String {
    if max_clients <= 1 {
        return limit.to_owned();
    }
    match limit.parse::<Rate>() {
        Ok(rate) => rate.divide(max_clients).to_string(),
        Err(_) => limit.to_owned(),
    }
}
