//! In-process mock of an exporter device server.
//!
//! Close enough to the real transport to drive the motor adapters in
//! tests: channels deliver injected pushes to subscribers and record
//! writes, commands return scripted replies and record invocations. Only
//! names registered up front resolve; everything else behaves like an
//! attribute the device does not export.

use super::{Channel, Command, ExporterBinding, ExporterValue};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const PUSH_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock remote attribute.
pub struct MockChannel {
    name: String,
    value: Mutex<ExporterValue>,
    writes: Mutex<Vec<ExporterValue>>,
    push_tx: broadcast::Sender<ExporterValue>,
}

impl MockChannel {
    fn new(name: &str, initial: ExporterValue) -> Self {
        let (push_tx, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            name: name.to_string(),
            value: Mutex::new(initial),
            writes: Mutex::new(Vec::new()),
            push_tx,
        }
    }

    /// Remote attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a server-side push to all subscribers.
    pub fn push(&self, value: impl Into<ExporterValue>) {
        let value = value.into();
        *lock(&self.value) = value.clone();
        let _ = self.push_tx.send(value);
    }

    /// All values written through this channel, in order.
    pub fn writes(&self) -> Vec<ExporterValue> {
        lock(&self.writes).clone()
    }

    /// The most recent write, if any.
    pub fn last_write(&self) -> Option<ExporterValue> {
        lock(&self.writes).last().cloned()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn read(&self) -> Result<ExporterValue> {
        Ok(lock(&self.value).clone())
    }

    async fn write(&self, value: ExporterValue) -> Result<()> {
        lock(&self.writes).push(value);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ExporterValue> {
        self.push_tx.subscribe()
    }
}

/// A mock remote procedure with a scripted reply.
pub struct MockCommand {
    name: String,
    reply: Mutex<Result<ExporterValue, String>>,
    invocations: Mutex<Vec<Vec<ExporterValue>>>,
}

impl MockCommand {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: Mutex::new(Ok(ExporterValue::Null)),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Remote procedure name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script the reply for subsequent invocations.
    pub fn set_reply(&self, value: impl Into<ExporterValue>) {
        *lock(&self.reply) = Ok(value.into());
    }

    /// Make subsequent invocations fail with a transport error.
    pub fn fail_with(&self, message: &str) {
        *lock(&self.reply) = Err(message.to_string());
    }

    /// Argument lists of all invocations, in order.
    pub fn invocations(&self) -> Vec<Vec<ExporterValue>> {
        lock(&self.invocations).clone()
    }

    /// How many times the command was invoked.
    pub fn invocation_count(&self) -> usize {
        lock(&self.invocations).len()
    }
}

#[async_trait]
impl Command for MockCommand {
    async fn invoke(&self, args: &[ExporterValue]) -> Result<ExporterValue> {
        lock(&self.invocations).push(args.to_vec());
        match &*lock(&self.reply) {
            Ok(value) => Ok(value.clone()),
            Err(message) => Err(anyhow!("{}: {}", self.name, message)),
        }
    }
}

/// Mock device server holding registered channels and commands.
#[derive(Default)]
pub struct MockExporter {
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    commands: Mutex<HashMap<String, Arc<MockCommand>>>,
}

impl MockExporter {
    /// Create an empty mock server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel and return its handle for push injection and
    /// write inspection.
    pub fn add_channel(&self, name: &str, initial: impl Into<ExporterValue>) -> Arc<MockChannel> {
        let channel = Arc::new(MockChannel::new(name, initial.into()));
        lock(&self.channels).insert(name.to_string(), channel.clone());
        channel
    }

    /// Register a command (replying `Null` until scripted otherwise).
    pub fn add_command(&self, name: &str) -> Arc<MockCommand> {
        let command = Arc::new(MockCommand::new(name));
        lock(&self.commands).insert(name.to_string(), command.clone());
        command
    }

    /// Handle of a registered channel.
    pub fn channel(&self, name: &str) -> Option<Arc<MockChannel>> {
        lock(&self.channels).get(name).cloned()
    }

    /// Handle of a registered command.
    pub fn command(&self, name: &str) -> Option<Arc<MockCommand>> {
        lock(&self.commands).get(name).cloned()
    }
}

#[async_trait]
impl ExporterBinding for MockExporter {
    async fn bind_channel(&self, name: &str) -> Result<Option<Arc<dyn Channel>>> {
        Ok(lock(&self.channels)
            .get(name)
            .map(|channel| channel.clone() as Arc<dyn Channel>))
    }

    async fn bind_command(&self, name: &str) -> Result<Arc<dyn Command>> {
        lock(&self.commands)
            .get(name)
            .map(|command| command.clone() as Arc<dyn Command>)
            .ok_or_else(|| anyhow!("no such command: {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_records_writes_and_delivers_pushes() {
        let server = MockExporter::new();
        let channel = server.add_channel("OmegaPosition", 0.0);

        let bound = server
            .bind_channel("OmegaPosition")
            .await
            .unwrap()
            .expect("channel registered");
        let mut rx = bound.subscribe();

        channel.push(12.5);
        assert_eq!(rx.recv().await.unwrap(), ExporterValue::Float(12.5));
        assert_eq!(bound.read().await.unwrap(), ExporterValue::Float(12.5));

        bound.write(ExporterValue::Float(90.0)).await.unwrap();
        assert_eq!(channel.last_write(), Some(ExporterValue::Float(90.0)));
    }

    #[tokio::test]
    async fn test_unregistered_channel_binds_to_none() {
        let server = MockExporter::new();
        assert!(server.bind_channel("PhiPosition").await.unwrap().is_none());
        assert!(server.bind_command("abort").await.is_err());
    }

    #[tokio::test]
    async fn test_command_scripting() {
        let server = MockExporter::new();
        let command = server.add_command("getMotorLimits");
        command.set_reply(ExporterValue::StrList(vec!["0".into(), "360".into()]));

        let bound = server.bind_command("getMotorLimits").await.unwrap();
        let reply = bound.invoke(&["Omega".into()]).await.unwrap();
        assert_eq!(
            reply,
            ExporterValue::StrList(vec!["0".into(), "360".into()])
        );
        assert_eq!(command.invocations(), vec![vec!["Omega".into()]]);

        command.fail_with("link down");
        assert!(bound.invoke(&[]).await.is_err());
        assert_eq!(command.invocation_count(), 2);
    }
}
