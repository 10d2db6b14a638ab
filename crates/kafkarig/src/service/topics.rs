use tokio::time::sleep;

use super::ClusterService;
use crate::{HarnessError, info, manifest::TopicSpec, remote::shell_quote, warn};

impl ClusterService {
    /// Create a topic through the coordination service.
    ///
    /// Success is taken from the tool's exit status. The follow-up describe is only
    /// logged, never checked against the request, and repeated creation of the same
    /// name is not guarded here.
    #[tracing::instrument(skip(self, spec), fields(topic = %spec.name))]
    pub async fn create_topic(&self, spec: &TopicSpec) -> Result<(), HarnessError> {
        spec.validate()?;
        let node = self.coordination_node()?;
        info!("Creating topic {} with settings {:?}", spec.name, spec.config);

        let cmd = self.create_topic_command(spec);
        info!("Running topic creation command...\n{cmd}");
        node.run(&cmd, false).await?;

        sleep(self.settings.topic_settle()).await;
        info!("Checking to see if topic {} was properly created...", spec.name);
        match self.describe_topic(&spec.name).await {
            Ok(description) => {
                for line in description.lines() {
                    info!("{line}");
                }
            }
            Err(e) => warn!("Could not describe topic {}: {e}", spec.name),
        }
        Ok(())
    }

    fn create_topic_command(&self, spec: &TopicSpec) -> String {
        let mut cmd = format!(
            "{} --zookeeper {} --create --topic {} --partitions {} --replication-factor {}",
            self.settings.tool("kafka-topics.sh"),
            shell_quote(&self.coordination_connect),
            shell_quote(&spec.name),
            spec.config.partitions,
            spec.config.replication_factor
        );
        for (name, value) in &spec.config.configs {
            cmd.push_str(&format!(" --config {}", shell_quote(&format!("{name}={value}"))));
        }
        cmd
    }

    /// Raw description text from the coordination service. Empty output is an error.
    pub async fn describe_topic(&self, topic: &str) -> Result<String, HarnessError> {
        let node = self.coordination_node()?;
        let cmd = format!(
            "{} --zookeeper {} --topic {} --describe",
            self.settings.tool("kafka-topics.sh"),
            shell_quote(&self.coordination_connect),
            shell_quote(topic)
        );
        let output = node.capture_all(&cmd, false).await?;
        if output.trim().is_empty() {
            return Err(HarnessError::coordination(
                "topic describe",
                format!("no description returned for topic {topic}"),
            ));
        }
        Ok(output)
    }
}
