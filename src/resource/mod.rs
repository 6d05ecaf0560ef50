/// Resource lifecycle: validated arguments plus the last observed live state
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// A declared piece of infrastructure, identified by its name
pub trait Resource: Send + Sync {
    /// Live state reported by the provider
    type State: Clone + fmt::Debug + Send + Sync;

    /// Resource type used in log lines and errors (e.g. "CacheSubnetGroup")
    fn resource_type(&self) -> &'static str;

    /// Primary identity key
    fn name(&self) -> &str;

    /// Check the declared arguments, normalizing them where needed
    fn validate(self) -> Result<Self>
    where
        Self: Sized,
    {
        Ok(self)
    }
}

/// Provider-facing operations for a resource
///
/// Implementations talk to the provider client and report failures as
/// errors. Logging and state bookkeeping live in [`Managed`].
#[async_trait]
pub trait Lifecycle<C: ?Sized + Sync>: Resource {
    /// Create the resource and return the live state the provider reported
    async fn create(&self, client: &C) -> Result<Self::State>;

    /// Look the resource up by name; `Ok(None)` when it does not exist
    async fn read(&self, client: &C) -> Result<Option<Self::State>>;

    /// Bring an existing resource in line with the declared arguments
    async fn update(&self, _client: &C) -> Result<Self::State> {
        Err(Error::Unsupported {
            resource_type: self.resource_type(),
            operation: "update",
        })
    }

    /// Delete the resource
    async fn delete(&self, client: &C) -> Result<()>;
}

/// Result of a lifecycle operation
#[derive(Debug)]
pub enum Outcome {
    /// The provider call went through
    Applied,
    /// Nothing to do: use-cache found the resource already in the wanted state
    Skipped,
    /// The provider call failed; the error was logged
    Failed(Error),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => write!(f, "applied"),
            Outcome::Skipped => write!(f, "skipped"),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// A resource together with its last observed live state
///
/// `active` is `None` until a successful create or read, and goes back to
/// `None` once the provider confirms a delete.
pub struct Managed<R: Resource> {
    args: R,
    active: Option<R::State>,
    use_cache: bool,
}

impl<R: Resource> Managed<R> {
    /// Validate the arguments; nothing is sent to a provider yet
    pub fn new(args: R) -> Result<Self> {
        Ok(Self {
            args: args.validate()?,
            active: None,
            use_cache: true,
        })
    }

    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn args(&self) -> &R {
        &self.args
    }

    pub fn active(&self) -> Option<&R::State> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    /// Create the resource, storing the returned live state
    pub async fn create<C>(&mut self, client: &C) -> Outcome
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        info!(
            "Creating {}: {}",
            self.args.resource_type(),
            self.args.name()
        );
        match self.args.create(client).await {
            Ok(state) => {
                debug!("{}: {:?}", self.args.resource_type(), state);
                self.active = Some(state);
                info!("{}: {} created", self.args.resource_type(), self.args.name());
                Outcome::Applied
            }
            Err(e) => {
                error!(
                    "{} {} could not be created: {}",
                    self.args.resource_type(),
                    self.args.name(),
                    e
                );
                Outcome::Failed(e)
            }
        }
    }

    /// Read the live state, swallowing provider errors into `None`
    pub async fn read<C>(&mut self, client: &C) -> Option<&R::State>
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        match self.lookup(client).await {
            Ok(()) => self.active.as_ref(),
            Err(e) => {
                error!(
                    "Error reading {} {}: {}",
                    self.args.resource_type(),
                    self.args.name(),
                    e
                );
                None
            }
        }
    }

    /// Read the live state, surfacing provider errors
    pub async fn refresh<C>(&mut self, client: &C) -> Result<Option<&R::State>>
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        self.lookup(client).await?;
        Ok(self.active.as_ref())
    }

    async fn lookup<C>(&mut self, client: &C) -> Result<()>
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        debug!("Reading {}: {}", self.args.resource_type(), self.args.name());
        let found = match self.args.read(client).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        match &found {
            Some(state) => debug!("{}: {:?}", self.args.resource_type(), state),
            None => debug!("No {} found", self.args.resource_type()),
        }
        self.active = found;
        Ok(())
    }

    /// Update the resource in place
    pub async fn update<C>(&mut self, client: &C) -> Outcome
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        info!(
            "Updating {}: {}",
            self.args.resource_type(),
            self.args.name()
        );
        match self.args.update(client).await {
            Ok(state) => {
                self.active = Some(state);
                info!("{}: {} updated", self.args.resource_type(), self.args.name());
                Outcome::Applied
            }
            Err(e) => {
                error!(
                    "{} {} could not be updated: {}",
                    self.args.resource_type(),
                    self.args.name(),
                    e
                );
                Outcome::Failed(e)
            }
        }
    }

    /// Delete the resource
    ///
    /// `active` is cleared once the provider confirms the deletion or reports
    /// the resource as already gone; any other failure leaves it untouched.
    pub async fn delete<C>(&mut self, client: &C) -> Outcome
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        info!(
            "Deleting {}: {}",
            self.args.resource_type(),
            self.args.name()
        );
        match self.args.delete(client).await {
            Ok(()) => {
                self.active = None;
                info!("{}: {} deleted", self.args.resource_type(), self.args.name());
                Outcome::Applied
            }
            Err(e) => {
                if e.is_not_found() {
                    self.active = None;
                }
                error!(
                    "{} {} could not be deleted: {}",
                    self.args.resource_type(),
                    self.args.name(),
                    e
                );
                error!("Please try again or delete resources manually.");
                Outcome::Failed(e)
            }
        }
    }

    fn lookup_failed(&self, action: &str, e: Error) -> Outcome {
        error!(
            "{} {} could not be checked before {}: {}",
            self.args.resource_type(),
            self.args.name(),
            action,
            e
        );
        Outcome::Failed(e)
    }

    /// Create unless use-cache finds the resource already active
    pub async fn apply<C>(&mut self, client: &C) -> Outcome
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        if self.use_cache {
            if let Err(e) = self.lookup(client).await {
                return self.lookup_failed("create", e);
            }
        }
        if self.use_cache && self.active.is_some() {
            info!(
                "{}: {} already exists, skipping create",
                self.args.resource_type(),
                self.args.name()
            );
            return Outcome::Skipped;
        }
        self.create(client).await
    }

    /// Delete unless use-cache finds nothing to delete
    pub async fn destroy<C>(&mut self, client: &C) -> Outcome
    where
        C: ?Sized + Sync,
        R: Lifecycle<C>,
    {
        if self.use_cache {
            if let Err(e) = self.lookup(client).await {
                return self.lookup_failed("delete", e);
            }
        }
        if self.use_cache && self.active.is_none() {
            info!(
                "{}: {} not found, skipping delete",
                self.args.resource_type(),
                self.args.name()
            );
            return Outcome::Skipped;
        }
        self.delete(client).await
    }
}

impl<R: Resource> fmt::Debug for Managed<R>
where
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("args", &self.args)
            .field("active", &self.active)
            .field("use_cache", &self.use_cache)
            .finish()
    }
}
