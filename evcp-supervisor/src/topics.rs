//! Topic layout shared with the launcher and the simulators
//!
//! ```text
//! {root}/cps/{id}/status                      in   charge point status
//! {root}/cps/{id}/connectors/{n}/status       in   connector status
//! {root}/cps/{id}/connectors/{n}/car          out  car values
//! {root}/cps/{id}/connectors/{n}/id_tag       out  badge
//! {root}/launcher/status                      in   "Alive" or other
//! {root}/launcher/cmd                         out  start/kill/restart
//! ```

/// Topic segments
mod segments {
    pub const CPS: &str = "cps";
    pub const CONNECTORS: &str = "connectors";
    pub const LAUNCHER: &str = "launcher";
    pub const STATUS: &str = "status";
    pub const CMD: &str = "cmd";
    pub const CAR: &str = "car";
    pub const ID_TAG: &str = "id_tag";
    pub const WILDCARD: &str = "+";
}

/// Classification of an inbound topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    LauncherStatus,
    ChargePointStatus { cp_id: String },
    ConnectorStatus { cp_id: String, connector_id: u32 },
}

/// Builds and parses topics under a fixed root
#[derive(Debug, Clone)]
pub struct TopicScheme {
    root: String,
}

impl TopicScheme {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn cp_status(&self, cp_id: &str) -> String {
        format!("{}/{}/{}/{}", self.root, segments::CPS, cp_id, segments::STATUS)
    }

    pub fn connector_status(&self, cp_id: &str, connector_id: u32) -> String {
        self.connector_topic(cp_id, connector_id, segments::STATUS)
    }

    pub fn connector_car(&self, cp_id: &str, connector_id: u32) -> String {
        self.connector_topic(cp_id, connector_id, segments::CAR)
    }

    pub fn connector_id_tag(&self, cp_id: &str, connector_id: u32) -> String {
        self.connector_topic(cp_id, connector_id, segments::ID_TAG)
    }

    pub fn launcher_status(&self) -> String {
        format!("{}/{}/{}", self.root, segments::LAUNCHER, segments::STATUS)
    }

    pub fn launcher_cmd(&self) -> String {
        format!("{}/{}/{}", self.root, segments::LAUNCHER, segments::CMD)
    }

    /// Wildcard patterns covering every inbound topic
    pub fn subscriptions(&self) -> [String; 3] {
        [
            self.cp_status(segments::WILDCARD),
            self.connector_status_pattern(),
            self.launcher_status(),
        ]
    }

    /// Classify an inbound topic, `None` if it is not part of the scheme
    pub fn parse(&self, topic: &str) -> Option<InboundTopic> {
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        match parts.as_slice() {
            [segments::LAUNCHER, segments::STATUS] => Some(InboundTopic::LauncherStatus),
            [segments::CPS, cp_id, segments::STATUS] if !cp_id.is_empty() => {
                Some(InboundTopic::ChargePointStatus {
                    cp_id: cp_id.to_string(),
                })
            }
            [segments::CPS, cp_id, segments::CONNECTORS, connector_id, segments::STATUS]
                if !cp_id.is_empty() =>
            {
                Some(InboundTopic::ConnectorStatus {
                    cp_id: cp_id.to_string(),
                    connector_id: connector_id.parse().ok()?,
                })
            }
            _ => None,
        }
    }

    fn connector_topic(&self, cp_id: &str, connector_id: u32, leaf: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.root,
            segments::CPS,
            cp_id,
            segments::CONNECTORS,
            connector_id,
            leaf
        )
    }

    fn connector_status_pattern(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.root,
            segments::CPS,
            segments::WILDCARD,
            segments::CONNECTORS,
            segments::WILDCARD,
            segments::STATUS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_building() {
        let topics = TopicScheme::new("cp_simu/");
        assert_eq!(topics.cp_status("cp1"), "cp_simu/cps/cp1/status");
        assert_eq!(
            topics.connector_car("cp1", 2),
            "cp_simu/cps/cp1/connectors/2/car"
        );
        assert_eq!(
            topics.connector_id_tag("cp1", 1),
            "cp_simu/cps/cp1/connectors/1/id_tag"
        );
        assert_eq!(topics.launcher_cmd(), "cp_simu/launcher/cmd");
        assert_eq!(
            topics.subscriptions(),
            [
                "cp_simu/cps/+/status".to_string(),
                "cp_simu/cps/+/connectors/+/status".to_string(),
                "cp_simu/launcher/status".to_string(),
            ]
        );
    }

    #[test]
    fn test_topic_parsing() {
        let topics = TopicScheme::new("cp_simu");

        assert_eq!(
            topics.parse("cp_simu/launcher/status"),
            Some(InboundTopic::LauncherStatus)
        );
        assert_eq!(
            topics.parse("cp_simu/cps/cp1/status"),
            Some(InboundTopic::ChargePointStatus {
                cp_id: "cp1".to_string()
            })
        );
        assert_eq!(
            topics.parse("cp_simu/cps/cp1/connectors/3/status"),
            Some(InboundTopic::ConnectorStatus {
                cp_id: "cp1".to_string(),
                connector_id: 3
            })
        );
        // An id that happens to contain the word is still a charge point topic
        assert_eq!(
            topics.parse("cp_simu/cps/connectors-lab/status"),
            Some(InboundTopic::ChargePointStatus {
                cp_id: "connectors-lab".to_string()
            })
        );
    }

    #[test]
    fn test_topic_parsing_rejects_foreign_topics() {
        let topics = TopicScheme::new("cp_simu");

        assert_eq!(topics.parse("other/cps/cp1/status"), None);
        assert_eq!(topics.parse("cp_simu/cps/cp1/connectors/x/status"), None);
        assert_eq!(topics.parse("cp_simu/cps/cp1/connectors/1/car"), None);
        assert_eq!(topics.parse("cp_simu/launcher/cmd"), None);
        assert_eq!(topics.parse("cp_simu_2/cps/cp1/status"), None);
    }
}
