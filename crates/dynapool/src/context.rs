//! Context and environment bridge
//!
//! [`ContextHolder`] gives the control plane one place to find named shared
//! objects ("beans") and configuration properties. It starts empty and every
//! lookup fails with [`ContextError::NotInitialized`] until
//! [`ContextHolder::initialize`] installs an [`AppContext`].

use std::any::Any;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

/// Profile reported when none is configured
pub const DEFAULT_PROFILE: &str = "default";

type Bean = Arc<dyn Any + Send + Sync>;

/// Errors from context lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// No context installed yet
    #[error("context is not initialized; call ContextHolder::initialize first")]
    NotInitialized,

    /// No bean matches the requested name or type
    #[error("no bean found: {0}")]
    BeanNotFound(String),

    /// A named bean exists but has another type
    #[error("bean {name} is not of type {expected}")]
    BeanTypeMismatch { name: String, expected: &'static str },

    /// More than one bean has the requested type
    #[error("expected one bean of type {expected}, found {found}")]
    AmbiguousBean { expected: &'static str, found: usize },

    /// A property value could not be parsed into the requested type
    #[error("property {key} has invalid value {value:?}")]
    InvalidProperty { key: String, value: String },
}

/// Configuration properties and profiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    properties: HashMap<String, String>,
    active_profiles: Vec<String>,
    default_profiles: Vec<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            properties: HashMap::new(),
            active_profiles: Vec::new(),
            default_profiles: vec![DEFAULT_PROFILE.to_string()],
        }
    }

    /// Load properties from process environment variables starting with `prefix`.
    ///
    /// `DYNAPOOL_MONITOR_INTERVAL_SECS` with prefix `DYNAPOOL_` becomes the
    /// property `monitor.interval.secs`. Active profiles come from
    /// `<prefix>PROFILES_ACTIVE` as a comma-separated list.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Like [`from_env`](Self::from_env) over an explicit variable list
    pub fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut environment = Self::new();
        let profiles_var = format!("{prefix}PROFILES_ACTIVE");

        for (name, value) in vars {
            if name == profiles_var {
                environment.active_profiles = split_list(&value);
                continue;
            }
            if let Some(stripped) = name.strip_prefix(prefix) {
                let key = stripped.to_ascii_lowercase().replace('_', ".");
                environment.properties.insert(key, value);
            }
        }

        debug!(
            properties = environment.properties.len(),
            active_profiles = ?environment.active_profiles,
            "Loaded environment"
        );
        environment
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_active_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn active_profiles(&self) -> &[String] {
        &self.active_profiles
    }

    pub fn default_profiles(&self) -> &[String] {
        &self.default_profiles
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Named shared objects plus the environment
pub struct AppContext {
    beans: HashMap<String, Bean>,
    environment: Environment,
}

impl AppContext {
    pub fn new(environment: Environment) -> Self {
        Self {
            beans: HashMap::new(),
            environment,
        }
    }

    /// Add a bean; a bean with the same name is replaced
    pub fn with_bean<T>(mut self, name: impl Into<String>, bean: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        self.beans.insert(name.into(), bean);
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn bean_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.beans.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("beans", &self.bean_names())
            .field("environment", &self.environment)
            .finish()
    }
}

/// Process-wide holder for the [`AppContext`]
#[derive(Debug, Default)]
pub struct ContextHolder {
    context: RwLock<Option<Arc<AppContext>>>,
}

impl ContextHolder {
    /// Create an uninitialized holder
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the context
    pub fn initialize(&self, context: AppContext) {
        info!(
            beans = context.beans.len(),
            active_profiles = ?context.environment.active_profiles,
            "Control plane context initialized"
        );
        *self.context.write() = Some(Arc::new(context));
    }

    pub fn is_initialized(&self) -> bool {
        self.context.read().is_some()
    }

    /// The installed context
    pub fn context(&self) -> Result<Arc<AppContext>, ContextError> {
        self.context
            .read()
            .clone()
            .ok_or(ContextError::NotInitialized)
    }

    /// The only bean of type `T`
    pub fn get_bean<T>(&self) -> Result<Arc<T>, ContextError>
    where
        T: Any + Send + Sync,
    {
        let mut matches = self.get_beans_of_type::<T>()?.into_values();
        match (matches.next(), matches.len()) {
            (Some(bean), 0) => Ok(bean),
            (Some(_), rest) => Err(ContextError::AmbiguousBean {
                expected: std::any::type_name::<T>(),
                found: rest + 1,
            }),
            (None, _) => Err(ContextError::BeanNotFound(
                std::any::type_name::<T>().to_string(),
            )),
        }
    }

    /// The bean registered as `name`, which must be of type `T`
    pub fn get_bean_named<T>(&self, name: &str) -> Result<Arc<T>, ContextError>
    where
        T: Any + Send + Sync,
    {
        let context = self.context()?;
        let bean = context
            .beans
            .get(name)
            .cloned()
            .ok_or_else(|| ContextError::BeanNotFound(name.to_string()))?;

        bean.downcast::<T>()
            .map_err(|_| ContextError::BeanTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Every bean of type `T`, keyed by name
    pub fn get_beans_of_type<T>(&self) -> Result<HashMap<String, Arc<T>>, ContextError>
    where
        T: Any + Send + Sync,
    {
        let context = self.context()?;
        Ok(context
            .beans
            .iter()
            .filter_map(|(name, bean)| {
                Arc::clone(bean)
                    .downcast::<T>()
                    .ok()
                    .map(|typed| (name.clone(), typed))
            })
            .collect())
    }

    pub fn get_environment_property(&self, key: &str) -> Result<Option<String>, ContextError> {
        Ok(self.context()?.environment.property(key).map(String::from))
    }

    pub fn get_environment_property_or(
        &self,
        key: &str,
        default: &str,
    ) -> Result<String, ContextError> {
        Ok(self
            .get_environment_property(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// Property parsed into `T`; absent properties are `Ok(None)`
    pub fn get_environment_property_as<T: FromStr>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ContextError> {
        match self.get_environment_property(key)? {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ContextError::InvalidProperty {
                    key: key.to_string(),
                    value,
                }),
        }
    }

    pub fn active_profiles(&self) -> Result<Vec<String>, ContextError> {
        Ok(self.context()?.environment.active_profiles.clone())
    }

    pub fn default_profiles(&self) -> Result<Vec<String>, ContextError> {
        Ok(self.context()?.environment.default_profiles.clone())
    }
}
