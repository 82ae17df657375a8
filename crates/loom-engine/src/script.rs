//! Bridge for systems implemented in an external scripting runtime.
//!
//! A [`ScriptHost`] exposes named callables. A [`ScriptedSystem`] binds one of
//! them to a [`SystemDescriptor`] built from [`ScriptSystemAttributes`], so
//! scripted systems go through the same catalog, tags and ordering
//! constraints as native ones and interleave with them deterministically.
//!
//! Attributes come as a `;`-separated metadata string:
//!
//! ```
//! use loom_engine::script::ScriptSystemAttributes;
//! use loom_ecs::schedule::Phase;
//!
//! let attrs: ScriptSystemAttributes = "tags=ai,npc; after=Physics; phase=post-update; editor".parse().unwrap();
//! assert_eq!(attrs.phase, Phase::PostUpdate);
//! assert!(attrs.enable_in_editor);
//!
//! let desc = attrs.descriptor("wander");
//! assert!(desc.tags.contains("npc"));
//! assert_eq!(desc.after, vec!["Physics"]);
//! ```

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use loom_ecs::schedule::{Phase, SystemCallable, SystemContext, SystemDescriptor};
use loom_ecs::signature::Signature;
use loom_ecs::world::World;

use crate::EngineError;

// ---------------------------------------------------------------------------
// ScriptHost
// ---------------------------------------------------------------------------

/// An external runtime that can invoke functions by name.
pub trait ScriptHost: Send + Sync {
    /// Run `function` for one frame of the system described by `ctx`.
    fn invoke(&self, function: &str, world: &mut World, ctx: &SystemContext) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ScriptSystemAttributes
// ---------------------------------------------------------------------------

/// Scheduling metadata declared next to a scripted system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptSystemAttributes {
    pub phase: Phase,
    pub tags: BTreeSet<String>,
    pub after: Vec<String>,
    pub before: Vec<String>,
    pub world_tags: BTreeSet<String>,
    pub enable_in_editor: bool,
}

impl ScriptSystemAttributes {
    /// Descriptor for a system called `name` with these attributes.
    pub fn descriptor(&self, name: &str) -> SystemDescriptor {
        SystemDescriptor {
            name: name.to_owned(),
            phase: self.phase,
            signature: None,
            tags: self.tags.clone(),
            after: self.after.clone(),
            before: self.before.clone(),
            enable_in_editor: self.enable_in_editor,
            world_tags: self.world_tags.clone(),
        }
    }
}

fn list(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

impl FromStr for ScriptSystemAttributes {
    type Err = EngineError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let fail = |details: String| EngineError::ScriptAttributes {
            input: input.to_owned(),
            details,
        };
        let mut attrs = Self::default();
        for item in input.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = match item.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (item, None),
            };
            match (key, value) {
                ("tags" | "tag", Some(v)) => attrs.tags.extend(list(v)),
                ("after", Some(v)) => attrs.after.extend(list(v)),
                ("before", Some(v)) => attrs.before.extend(list(v)),
                ("world" | "world_tags", Some(v)) => attrs.world_tags.extend(list(v)),
                ("phase", Some(v)) => {
                    attrs.phase = match v {
                        "pre-update" | "PreUpdate" => Phase::PreUpdate,
                        "update" | "Update" => Phase::Update,
                        "post-update" | "PostUpdate" => Phase::PostUpdate,
                        other => return Err(fail(format!("unknown phase '{other}'"))),
                    }
                }
                ("editor", None) => attrs.enable_in_editor = true,
                ("editor", Some(v)) => {
                    attrs.enable_in_editor = v
                        .parse()
                        .map_err(|_| fail(format!("editor expects true or false, got '{v}'")))?
                }
                (key, Some(_)) => return Err(fail(format!("unknown attribute '{key}'"))),
                (key, None) => return Err(fail(format!("attribute '{key}' needs a value"))),
            }
        }
        Ok(attrs)
    }
}

// ---------------------------------------------------------------------------
// ScriptedSystem
// ---------------------------------------------------------------------------

/// A system body that forwards to a script function.
///
/// Script failures cannot abort the frame; they are logged and counted.
pub struct ScriptedSystem {
    host: Arc<dyn ScriptHost>,
    function: String,
    failures: AtomicU64,
}

impl std::fmt::Debug for ScriptedSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSystem")
            .field("function", &self.function)
            .field("failures", &self.failures())
            .finish()
    }
}

impl ScriptedSystem {
    pub fn new(host: Arc<dyn ScriptHost>, function: impl Into<String>) -> Self {
        Self {
            host,
            function: function.into(),
            failures: AtomicU64::new(0),
        }
    }

    /// Build the descriptor and body for a scripted system.
    ///
    /// `attributes` uses the metadata syntax of [`ScriptSystemAttributes`];
    /// `signature`, when given, binds the system to a sample.
    pub fn describe(
        name: &str,
        function: &str,
        attributes: &str,
        signature: Option<Signature>,
        host: Arc<dyn ScriptHost>,
    ) -> Result<(SystemDescriptor, Arc<Self>), EngineError> {
        let mut descriptor = attributes.parse::<ScriptSystemAttributes>()?.descriptor(name);
        descriptor.signature = signature;
        Ok((descriptor, Arc::new(Self::new(host, function))))
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Invoke the script function, surfacing its error.
    pub fn call(&self, world: &mut World, ctx: &SystemContext) -> Result<(), EngineError> {
        self.host
            .invoke(&self.function, world, ctx)
            .map_err(|source| EngineError::Script {
                system: ctx.system.to_string(),
                function: self.function.clone(),
                source,
            })
    }
}

impl SystemCallable for ScriptedSystem {
    fn run(&self, world: &mut World, ctx: &SystemContext) {
        if let Err(err) = self.call(world, ctx) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(system = %ctx.system, frame = ctx.frame, error = %err, "scripted system failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
