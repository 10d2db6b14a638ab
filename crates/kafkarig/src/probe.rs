//! Background console consumers that capture and validate messages.
//!
//! Each probe instance runs on its own node as one task streaming the remote
//! consumer's stdout. The task owns the sending half of a channel; validated
//! messages are drained into the instance's sequence only once the task has
//! finished, so a reader never observes a half-written result.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::{
    HarnessError, debug, info,
    manifest::HarnessSettings,
    member::MemberPaths,
    remote::{LineStream, RemoteNode, process_filter, shell_quote},
    render::{ConfigRenderer, DefaultRenderer},
    service::ClusterService,
    wait::wait_until,
    warn,
};

/// Maps a trimmed output line to a message, or `None` to drop it.
pub type Validator<T> = Arc<dyn Fn(&str) -> Option<T> + Send + Sync>;

/// Default validator: keep lines that parse as integers.
pub fn parse_int(line: &str) -> Option<i64> {
    line.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Running,
    /// Termination requested but not yet observed.
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub topic: String,
    pub coordination_connect: String,
    /// Start from the earliest retained record rather than only new ones.
    pub from_beginning: bool,
    /// End an instance once no line has arrived for this long.
    pub idle_timeout: Option<Duration>,
    pub settings: HarnessSettings,
}

impl ProbeConfig {
    pub fn new(topic: impl Into<String>, coordination_connect: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            coordination_connect: coordination_connect.into(),
            from_beginning: true,
            idle_timeout: None,
            settings: HarnessSettings::default(),
        }
    }

    /// Consume `topic` from the cluster the service manages, with its settings.
    pub fn for_cluster(service: &ClusterService, topic: impl Into<String>) -> Self {
        Self::new(topic, service.coordination_connect()).with_settings(service.settings().clone())
    }

    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn with_settings(mut self, settings: HarnessSettings) -> Self {
        self.settings = settings;
        self
    }
}

struct ProbeTask<T> {
    handle: JoinHandle<Result<(), HarnessError>>,
    results: mpsc::UnboundedReceiver<T>,
}

struct ProbeSlot<T> {
    node: Arc<dyn RemoteNode>,
    state: ProbeState,
    task: Option<ProbeTask<T>>,
    messages: Vec<T>,
}

/// One console consumer per node; instances are addressed by 1-based index.
pub struct StreamProbe<T = i64> {
    slots: Vec<ProbeSlot<T>>,
    config: ProbeConfig,
    paths: MemberPaths,
    renderer: Arc<dyn ConfigRenderer>,
    validator: Validator<T>,
}

impl StreamProbe<i64> {
    /// Probe keeping only integer lines.
    pub fn new(nodes: Vec<Arc<dyn RemoteNode>>, config: ProbeConfig) -> Self {
        Self::with_validator(nodes, config, parse_int)
    }
}

impl<T: Send + 'static> StreamProbe<T> {
    pub fn with_validator<F>(nodes: Vec<Arc<dyn RemoteNode>>, config: ProbeConfig, validator: F) -> Self
    where
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        let paths = MemberPaths::console_consumer(&config.settings.consumer_root);
        let slots = nodes
            .into_iter()
            .map(|node| ProbeSlot {
                node,
                state: ProbeState::Idle,
                task: None,
                messages: Vec::new(),
            })
            .collect();

        Self {
            slots,
            config,
            paths,
            renderer: Arc::new(DefaultRenderer),
            validator: Arc::new(validator),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ConfigRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn instances(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn slot(&self, instance: usize) -> Result<&ProbeSlot<T>, HarnessError> {
        instance
            .checked_sub(1)
            .and_then(|idx| self.slots.get(idx))
            .ok_or_else(|| unknown_instance(instance))
    }

    fn slot_mut(&mut self, instance: usize) -> Result<&mut ProbeSlot<T>, HarnessError> {
        instance
            .checked_sub(1)
            .and_then(|idx| self.slots.get_mut(idx))
            .ok_or_else(|| unknown_instance(instance))
    }

    pub fn state(&self, instance: usize) -> Result<ProbeState, HarnessError> {
        Ok(self.slot(instance)?.state)
    }

    pub fn start_command(&self) -> String {
        let settings = &self.config.settings;
        let mut cmd = format!(
            "export LOG_DIR={}; export KAFKA_LOG4J_OPTS=\"-Dlog4j.configuration=file:{}\"; \
             {} --topic {} --zookeeper {} --consumer.config {}",
            shell_quote(&self.paths.log_dir),
            self.paths.log4j_config,
            settings.tool("kafka-console-consumer.sh"),
            shell_quote(&self.config.topic),
            shell_quote(&self.config.coordination_connect),
            shell_quote(&self.paths.config_file),
        );
        if self.config.from_beginning {
            cmd.push_str(" --from-beginning");
        }
        cmd.push_str(&format!(
            " 2>> {} | tee -a {}",
            shell_quote(&self.paths.stderr),
            shell_quote(&self.paths.stdout)
        ));
        cmd
    }

    /// Upload configuration and launch the instance's background consumer task.
    pub async fn start(&mut self, instance: usize) -> Result<(), HarnessError> {
        let slot = self.slot(instance)?;
        if matches!(slot.state, ProbeState::Running | ProbeState::Stopping) {
            return Err(HarnessError::ProbeState {
                instance,
                reason: "already running".to_string(),
            });
        }
        let node = Arc::clone(&slot.node);

        node.run(
            &format!(
                "mkdir -p {} {}",
                shell_quote(&self.paths.root),
                shell_quote(&self.paths.log_dir)
            ),
            false,
        )
        .await?;

        let props = self.renderer.consumer_properties(self.config.idle_timeout);
        info!("console_consumer.properties:\n{props}");
        node.create_file(&self.paths.config_file, &props).await?;
        node.create_file(
            &self.paths.log4j_config,
            &self.renderer.log4j(&self.paths.log_file),
        )
        .await?;

        let cmd = self.start_command();
        debug!("Console consumer {instance} command: {cmd}");
        let lines = node.capture(&cmd, true).await?;

        let (sender, results) = mpsc::unbounded_channel();
        let handle = tokio::spawn(consume(
            instance,
            lines,
            Arc::clone(&self.validator),
            self.config.idle_timeout,
            sender,
        ));

        let slot = self.slot_mut(instance)?;
        slot.task = Some(ProbeTask { handle, results });
        slot.state = ProbeState::Running;
        Ok(())
    }

    pub async fn start_all(&mut self) -> Result<(), HarnessError> {
        for instance in 1..=self.instances() {
            self.start(instance).await?;
        }
        Ok(())
    }

    pub async fn pids(&self, instance: usize) -> Result<Vec<u32>, HarnessError> {
        let slot = self.slot(instance)?;
        slot.node
            .pids(&process_filter(&self.config.settings.consumer_process_pattern))
            .await
    }

    /// True iff a consumer process is found on the instance's node. Query failures read as "not alive".
    pub async fn is_alive(&self, instance: usize) -> bool {
        match self.pids(instance).await {
            Ok(pids) => !pids.is_empty(),
            Err(e) => {
                debug!("Treating console consumer {instance} as stopped: {e}");
                false
            }
        }
    }

    /// Signal the remote consumer and block until it is gone, bounded by the stop timeout.
    pub async fn stop(&mut self, instance: usize) -> Result<(), HarnessError> {
        let slot = self.slot_mut(instance)?;
        if slot.state == ProbeState::Running {
            slot.state = ProbeState::Stopping;
        }
        let node = Arc::clone(&slot.node);

        if let Err(e) = node
            .kill_process(&self.config.settings.consumer_process_pattern, true, true)
            .await
        {
            warn!("Failed to signal console consumer {instance}: {e}");
        }

        let this = &*self;
        wait_until(
            || async move { !this.is_alive(instance).await },
            self.config.settings.stop_timeout(),
            self.config.settings.stop_backoff(),
            &format!("console consumer {instance} to stop"),
        )
        .await?;

        self.collect(instance).await
    }

    /// Wait for an instance to end on its own, e.g. through its idle timeout.
    pub async fn wait_until_finished(
        &mut self,
        instance: usize,
        limit: Duration,
    ) -> Result<(), HarnessError> {
        let this = &*self;
        this.slot(instance)?;
        wait_until(
            || async move {
                this.slot(instance)
                    .map(|slot| slot.task.as_ref().is_none_or(|t| t.handle.is_finished()))
                    .unwrap_or(true)
            },
            limit,
            self.config.settings.stop_backoff(),
            &format!("console consumer {instance} to finish"),
        )
        .await?;

        self.collect(instance).await
    }

    /// Force-kill the consumer if still alive, then remove its artifacts. Safe to repeat.
    pub async fn clean(&mut self, instance: usize) -> Result<(), HarnessError> {
        let node = Arc::clone(&self.slot(instance)?.node);

        if self.is_alive(instance).await {
            warn!(
                "Console consumer {instance} on {} was still alive at cleanup time. Killing forcefully...",
                node.hostname()
            );
        }
        if let Err(e) = node
            .kill_process(&self.config.settings.consumer_process_pattern, false, true)
            .await
        {
            warn!("Failed to kill console consumer {instance}: {e}");
        }

        if let Some(task) = self.slot_mut(instance)?.task.as_ref() {
            task.handle.abort();
        }
        self.collect(instance).await?;

        node.run(&format!("rm -rf {}", shell_quote(&self.paths.root)), false)
            .await
    }

    /// Join the instance's task and move its results into the message sequence.
    async fn collect(&mut self, instance: usize) -> Result<(), HarnessError> {
        let join_limit = self.config.settings.stop_timeout();
        let slot = self.slot_mut(instance)?;
        let Some(mut task) = slot.task.take() else {
            return Ok(());
        };

        match timeout(join_limit, &mut task.handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("Console consumer {instance} ended with error: {e}"),
            Ok(Err(e)) if e.is_cancelled() => debug!("Console consumer {instance} task aborted"),
            Ok(Err(e)) => warn!("Console consumer {instance} task failed: {e}"),
            Err(_) => {
                warn!("Console consumer {instance} task did not finish in {join_limit:?}; aborting");
                task.handle.abort();
            }
        }

        while let Ok(message) = task.results.try_recv() {
            slot.messages.push(message);
        }
        slot.state = ProbeState::Stopped;
        info!(
            "Console consumer {instance} stopped with {} messages",
            slot.messages.len()
        );
        Ok(())
    }

    /// Validated messages of a stopped instance, in arrival order.
    pub fn messages(&self, instance: usize) -> Result<&[T], HarnessError> {
        let slot = self.slot(instance)?;
        match slot.state {
            ProbeState::Running | ProbeState::Stopping => Err(HarnessError::ProbeState {
                instance,
                reason: "messages are only readable once the consumer has stopped".to_string(),
            }),
            ProbeState::Idle | ProbeState::Stopped => Ok(&slot.messages),
        }
    }

    /// Messages of every instance, in instance order.
    pub fn all_messages(&self) -> Result<Vec<&[T]>, HarnessError> {
        (1..=self.instances())
            .map(|instance| self.messages(instance))
            .collect()
    }
}

impl<T> Drop for StreamProbe<T> {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Some(task) = &slot.task {
                task.handle.abort();
            }
        }
    }
}

fn unknown_instance(instance: usize) -> HarnessError {
    HarnessError::ProbeState {
        instance,
        reason: "no such probe instance".to_string(),
    }
}

async fn consume<T>(
    instance: usize,
    mut lines: LineStream,
    validator: Validator<T>,
    idle_timeout: Option<Duration>,
    results: mpsc::UnboundedSender<T>,
) -> Result<(), HarnessError> {
    loop {
        let next = match idle_timeout {
            Some(limit) => match timeout(limit, lines.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!("Console consumer {instance} received nothing for {limit:?}; ending");
                    return Ok(());
                }
            },
            None => lines.next().await,
        };
        let Some(line) = next else {
            return Ok(());
        };

        let raw = line?;
        let msg = raw.trim();
        if let Some(message) = validator(msg) {
            debug!("Console consumer {instance} consumed a message: {msg}");
            if results.send(message).is_err() {
                return Ok(());
            }
        }
    }
}
