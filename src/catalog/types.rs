use serde::{Deserialize, Serialize};
use url::Url;

/// A runnable image, identified by name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Image {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

impl std::fmt::Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// Remote state of a container as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Removing,
    Failed,
    /// Any state this crate does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerState::Stopped => "STOPPED",
            ContainerState::Starting => "STARTING",
            ContainerState::Running => "RUNNING",
            ContainerState::Stopping => "STOPPING",
            ContainerState::Removing => "REMOVING",
            ContainerState::Failed => "FAILED",
            ContainerState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Reference to a remote container, enough to re-read it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    /// Image reference the container was created from.
    pub image: String,
    /// State at the time this representation was fetched.
    pub state: ContainerState,
    /// Absolute `self` link of the container resource.
    pub self_link: Url,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_equality_is_by_name_and_type() {
        assert_eq!(Image::new("nginx", "web"), Image::new("nginx", "web"));
        assert_ne!(Image::new("nginx", "web"), Image::new("nginx", "proxy"));
    }

    #[test]
    fn test_image_type_field_on_the_wire() {
        let image: Image = serde_json::from_str(r#"{"name":"postgres","type":"db"}"#).unwrap();
        assert_eq!(image, Image::new("postgres", "db"));
    }

    #[test]
    fn test_unrecognized_state_is_unknown() {
        let state: ContainerState = serde_json::from_str(r#""PAUSED""#).unwrap();
        assert_eq!(state, ContainerState::Unknown);

        let state: ContainerState = serde_json::from_str(r#""RUNNING""#).unwrap();
        assert_eq!(state, ContainerState::Running);
        assert_eq!(state.to_string(), "RUNNING");
    }
}
