//! ---
//! ptf_section: "05-orchestration"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Per-scope parallelization settings and limiter cache."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use ptf_common::{FrameworkConfig, FrameworkError, Result, ScopeSettings};
use ptf_rt::Limiter;
use tracing::{debug, info};

use crate::identity::normalize_assembly_name;

/// Assembly-level metadata supplied by the discovery collaborator.
#[derive(Debug, Clone, Default)]
pub struct AssemblyMetadata {
    /// Qualified or plain assembly name.
    pub name: String,
    /// Assembly-level parallelization settings.
    pub settings: ScopeSettings,
}

impl AssemblyMetadata {
    /// Metadata for `name` with the given settings.
    pub fn new(name: impl Into<String>, settings: ScopeSettings) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }
}

/// Host execution options for one assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyOptions {
    /// The host enumerates every data row before execution starts.
    pub pre_enumerate_cases: bool,
    /// All parallel execution in the assembly is switched off.
    pub disable_parallelization: bool,
    /// Collections may run concurrently.
    pub parallelize_collections: bool,
    /// The assembly may run concurrently with other assemblies.
    pub parallelize_assembly: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            pre_enumerate_cases: true,
            disable_parallelization: false,
            parallelize_collections: true,
            parallelize_assembly: false,
        }
    }
}

impl AssemblyOptions {
    /// Apply the assembly's enable/disable switch on top of the host options.
    pub fn refined(self, settings: &ScopeSettings) -> Self {
        match settings.enabled {
            Some(true) => Self {
                pre_enumerate_cases: true,
                disable_parallelization: false,
                parallelize_collections: true,
                parallelize_assembly: true,
            },
            Some(false) => Self {
                pre_enumerate_cases: false,
                disable_parallelization: true,
                parallelize_collections: false,
                parallelize_assembly: false,
            },
            None => self,
        }
    }
}

/// Identity of the method whose cases are being run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionScope {
    /// Assembly name, normalised on construction.
    pub assembly: String,
    /// Fully qualified class name.
    pub class: String,
    /// Method name.
    pub method: String,
}

impl ExecutionScope {
    /// Scope for `assembly::class::method`.
    pub fn new(
        assembly: impl AsRef<str>,
        class: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            assembly: normalize_assembly_name(assembly.as_ref()),
            class: class.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.method)
    }
}

/// Which level of a scope owns the limiter in use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Assembly-wide limiter, also used for the host default degree.
    Assembly,
    /// Limiter owned by one class.
    Class(String),
    /// Limiter owned by one method.
    Method {
        /// Owning class.
        class: String,
        /// Method name.
        method: String,
    },
}

/// Concurrency policy resolved for one scope.
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    /// Level whose degree won.
    pub key: ScopeKey,
    /// Effective degree; `0` means unbounded host scheduling.
    pub degree: usize,
    /// Shared limiter, absent when `degree == 0`.
    pub limiter: Option<Arc<Limiter>>,
}

#[derive(Debug, Clone, Copy)]
struct RegisteredAssembly {
    settings: ScopeSettings,
    options: AssemblyOptions,
}

/// Resolver mapping scopes to concurrency policy.
///
/// Assemblies are registered once; their settings and refined options are
/// immutable afterwards. Limiters are created on first use per
/// `(assembly, scope key)` and shared by every later lookup.
pub struct ParallelSettings {
    host_degree: usize,
    overrides: IndexMap<String, ScopeSettings>,
    assemblies: Mutex<HashMap<String, RegisteredAssembly>>,
    limiters: Mutex<HashMap<(String, ScopeKey), Option<Arc<Limiter>>>>,
}

impl ParallelSettings {
    /// Resolver using `host_degree` when no scope specifies a degree.
    pub fn new(host_degree: usize) -> Self {
        Self {
            host_degree: host_degree.max(1),
            overrides: IndexMap::new(),
            assemblies: Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Resolver seeded from the framework configuration.
    pub fn from_config(config: &FrameworkConfig) -> Self {
        let mut settings = Self::new(config.execution.host_default_degree());
        settings.overrides = config
            .assemblies
            .iter()
            .map(|(name, scope)| (normalize_assembly_name(name), *scope))
            .collect();
        settings
    }

    /// Degree used when neither method, class nor assembly specify one.
    pub fn host_degree(&self) -> usize {
        self.host_degree
    }

    /// Register an assembly and return its refined options.
    ///
    /// Discovery metadata wins over static configuration overrides. The first
    /// registration of an assembly is final; later calls return the cached
    /// options unchanged.
    pub fn register_assembly(
        &self,
        metadata: &AssemblyMetadata,
        host: AssemblyOptions,
    ) -> Result<AssemblyOptions> {
        let key = normalize_assembly_name(&metadata.name);
        let mut assemblies = self.assemblies.lock();
        if let Some(existing) = assemblies.get(&key) {
            return Ok(existing.options);
        }

        let fallback = self.overrides.get(&key).copied().unwrap_or_default();
        let settings = ScopeSettings {
            enabled: metadata.settings.enabled.or(fallback.enabled),
            degree: metadata.settings.degree.or(fallback.degree),
        };
        settings.validate()?;
        let options = host.refined(&settings);
        info!(
            assembly = %key,
            enabled = ?settings.enabled,
            degree = ?settings.degree,
            disable_parallelization = options.disable_parallelization,
            "assembly registered"
        );
        assemblies.insert(key, RegisteredAssembly { settings, options });
        Ok(options)
    }

    /// Refined options of a registered assembly.
    pub fn options(&self, assembly: &str) -> Result<AssemblyOptions> {
        Ok(self.registered(assembly)?.options)
    }

    /// Effective assembly-level settings of a registered assembly.
    pub fn assembly_settings(&self, assembly: &str) -> Result<ScopeSettings> {
        Ok(self.registered(assembly)?.settings)
    }

    fn registered(&self, assembly: &str) -> Result<RegisteredAssembly> {
        let key = normalize_assembly_name(assembly);
        self.assemblies.lock().get(&key).copied().ok_or_else(|| {
            FrameworkError::configuration(format!(
                "assembly '{key}' was queried before it was registered"
            ))
        })
    }

    /// Resolve the concurrency policy of `scope`.
    ///
    /// Degree priority is method, then class, then assembly, then the host
    /// default. A degree of `0` yields no limiter.
    pub fn resolve(
        &self,
        scope: &ExecutionScope,
        class: &ScopeSettings,
        method: &ScopeSettings,
    ) -> Result<ResolvedScope> {
        let assembly = self.registered(&scope.assembly)?;
        class.validate()?;
        method.validate()?;

        let (key, degree) = if let Some(degree) = method.degree {
            (
                ScopeKey::Method {
                    class: scope.class.clone(),
                    method: scope.method.clone(),
                },
                degree,
            )
        } else if let Some(degree) = class.degree {
            (ScopeKey::Class(scope.class.clone()), degree)
        } else if let Some(degree) = assembly.settings.degree {
            (ScopeKey::Assembly, degree)
        } else {
            (ScopeKey::Assembly, self.host_degree as i64)
        };
        let degree = usize::try_from(degree).map_err(|_| {
            FrameworkError::configuration(format!(
                "degree of parallelism must be zero or positive, got {degree}"
            ))
        })?;

        let limiter = self.limiter(&scope.assembly, key.clone(), degree)?;
        Ok(ResolvedScope {
            key,
            degree,
            limiter,
        })
    }

    fn limiter(
        &self,
        assembly: &str,
        key: ScopeKey,
        degree: usize,
    ) -> Result<Option<Arc<Limiter>>> {
        let mut limiters = self.limiters.lock();
        let cache_key = (assembly.to_owned(), key);
        if let Some(existing) = limiters.get(&cache_key) {
            return Ok(existing.clone());
        }
        let limiter = if degree == 0 {
            None
        } else {
            Some(Arc::new(Limiter::new(degree)?))
        };
        debug!(
            assembly = %assembly,
            scope = ?cache_key.1,
            degree,
            bounded = limiter.is_some(),
            "limiter created"
        );
        limiters.insert(cache_key, limiter.clone());
        Ok(limiter)
    }

    /// Number of cached limiter entries.
    pub fn limiter_count(&self) -> usize {
        self.limiters.lock().len()
    }
}

impl fmt::Debug for ParallelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelSettings")
            .field("host_degree", &self.host_degree)
            .field("assemblies", &self.assemblies.lock().len())
            .field("limiters", &self.limiters.lock().len())
            .finish()
    }
}
