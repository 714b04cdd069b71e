//! Shared fixtures: a scripted in-memory remote and a small schema set.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use halyard_core::{Attributes, FieldSchema, ResourceSchema, SchemaRegistry, Scope, Value};
use halyard_provisioner::{
    BoxFuture, EngineSettings, RemoteClient, RemoteError, RetryPolicy, RunContext,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// `group` at the root, `widget` scoped by its group's name.
pub fn schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(ResourceSchema::new(
            "group",
            vec![
                FieldSchema::string("name").required(),
                FieldSchema::string("location"),
                FieldSchema::string("id").output_only(),
            ],
        ))
        .with(
            ResourceSchema::new(
                "widget",
                vec![
                    FieldSchema::string("name").required(),
                    FieldSchema::string("group_name").required(),
                    FieldSchema::string("group_id"),
                    FieldSchema::number("size"),
                    FieldSchema::string("color").one_of(&["red", "blue"]),
                    FieldSchema::string("id").output_only(),
                ],
            )
            .scoped_by(&["group_name"]),
        )
}

/// Fast retries so failure paths finish in milliseconds.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry: RetryPolicy::new(3, 1, 5).without_jitter(),
        verify: RetryPolicy::new(3, 1, 5).without_jitter(),
        ..EngineSettings::default()
    }
}

pub fn context(remote: &Arc<ScriptedRemote>) -> RunContext {
    RunContext::new(remote.clone(), schemas()).with_settings(fast_settings())
}

/// In-memory remote that records every call and fails on request.
///
/// Objects are keyed by remote name; names are unique within each test.
#[derive(Default)]
pub struct ScriptedRemote {
    objects: Mutex<BTreeMap<String, Attributes>>,
    calls: Mutex<Vec<String>>,
    transient: Mutex<HashMap<String, u32>>,
    rejected: Mutex<HashSet<String>>,
    sticky: Mutex<HashSet<String>>,
    vanishing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `"create g1"`, `"get w1"`, ... in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, name: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').nth(1) == Some(name))
            .collect()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn object(&self, name: &str) -> Option<Attributes> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Overwrite one field remotely, as an out-of-band edit would.
    pub fn tamper(&self, name: &str, field: &str, value: impl Into<Value>) {
        if let Some(obj) = self.objects.lock().unwrap().get_mut(name) {
            obj.insert(field.to_string(), value.into());
        }
    }

    /// The next `times` calls touching `name` fail transiently.
    pub fn fail_transiently(&self, name: &str, times: u32) {
        self.transient.lock().unwrap().insert(name.to_string(), times);
    }

    /// Creates and updates of `name` are rejected.
    pub fn reject(&self, name: &str) {
        self.rejected.lock().unwrap().insert(name.to_string());
    }

    /// Deletes of `name` succeed but the object stays.
    pub fn sticky(&self, name: &str) {
        self.sticky.lock().unwrap().insert(name.to_string());
    }

    /// The next update of `name` finds it deleted by someone else.
    pub fn vanish_before_update(&self, name: &str) {
        self.vanishing.lock().unwrap().insert(name.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &str, name: &str) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(format!("{op} {name}"));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut transient = self.transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transient(format!("{op} {name}: throttled")));
            }
        }
        Ok(())
    }
}

impl RemoteClient for ScriptedRemote {
    fn get<'a>(
        &'a self,
        _scope: &'a Scope,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Attributes>, RemoteError>> {
        Box::pin(async move {
            self.enter("get", name).await?;
            Ok(self.object(name))
        })
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        attrs: &'a Attributes,
    ) -> BoxFuture<'a, Result<Attributes, RemoteError>> {
        Box::pin(async move {
            self.enter("create", name).await?;
            if self.rejected.lock().unwrap().contains(name) {
                return Err(RemoteError::Rejected(format!("{name} is not allowed")));
            }
            let mut path = scope.path();
            path.push(name);
            let mut obj = attrs.clone();
            obj.insert("id".into(), format!("/{}", path.join("/")).into());
            self.objects
                .lock()
                .unwrap()
                .insert(name.to_string(), obj.clone());
            Ok(obj)
        })
    }

    fn update<'a>(
        &'a self,
        _scope: &'a Scope,
        name: &'a str,
        delta: &'a Attributes,
    ) -> BoxFuture<'a, Result<Attributes, RemoteError>> {
        Box::pin(async move {
            self.enter("update", name).await?;
            if self.vanishing.lock().unwrap().remove(name) {
                self.objects.lock().unwrap().remove(name);
            }
            if self.rejected.lock().unwrap().contains(name) {
                return Err(RemoteError::Rejected(format!("{name} is not allowed")));
            }
            let mut objects = self.objects.lock().unwrap();
            let obj = objects
                .get_mut(name)
                .ok_or_else(|| RemoteError::NotFound(name.to_string()))?;
            obj.extend(delta.clone());
            Ok(obj.clone())
        })
    }

    fn delete<'a>(
        &'a self,
        _scope: &'a Scope,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.enter("delete", name).await?;
            if self.sticky.lock().unwrap().contains(name) {
                return Ok(());
            }
            match self.objects.lock().unwrap().remove(name) {
                Some(_) => Ok(()),
                None => Err(RemoteError::NotFound(name.to_string())),
            }
        })
    }
}
