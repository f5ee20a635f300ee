//! Invocation registry: named handlers bound to realms.
//!
//! The registry is filled once during session setup and then frozen behind
//! an `Arc` handed to the [`Router`](crate::Router). Registering returns an
//! [`Invocation`], the constructor feature code uses to build requests.

use crate::error::RpcError;
use crate::store::{AppState, StateReader};
use crate::task::{ExecutionContext, Outcome};
use roomcast_types::{CollisionPolicy, PeerId, RpcConfig};
use roomcast_wire::{Connection, InvocationMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Who originates an invocation and who executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    /// Runs on the host; clients forward it to the host.
    Server,
    /// Sent by the host to chosen clients; clients may not originate it.
    Client,
    /// Runs everywhere; the host broadcasts it, a client runs it locally.
    Multicast,
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Realm::Server => write!(f, "server"),
            Realm::Client => write!(f, "client"),
            Realm::Multicast => write!(f, "multicast"),
        }
    }
}

/// Positional arguments handed to a handler.
#[derive(Debug, Clone)]
pub struct Args {
    invocation: String,
    values: Vec<Value>,
}

impl Args {
    pub fn new(invocation: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            invocation: invocation.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Deserialize the argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| RpcError::InvalidArguments {
                name: self.invocation.clone(),
                reason: format!("missing argument {index}"),
            })?;
        serde_json::from_value(value.clone()).map_err(|e| RpcError::InvalidArguments {
            name: self.invocation.clone(),
            reason: format!("argument {index}: {e}"),
        })
    }
}

/// Everything a handler sees for one execution.
pub struct Call<'a, S> {
    pub args: &'a Args,
    pub context: &'a ExecutionContext,
    pub state: &'a StateReader<S>,
}

impl<S> Call<'_, S> {
    /// Shorthand for `self.args.get(index)`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        self.args.get(index)
    }
}

/// Values that can be packed into invocation arguments.
pub trait IntoArgs {
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error>;
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(Vec::new())
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(self)
    }
}

macro_rules! tuple_into_args {
    ($($name:ident),+) => {
        impl<$($name: Serialize),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
                let ($($name,)+) = self;
                Ok(vec![$(serde_json::to_value($name)?),+])
            }
        }
    };
}

tuple_into_args!(A);
tuple_into_args!(A, B);
tuple_into_args!(A, B, C);
tuple_into_args!(A, B, C, D);

/// A message on its way into the router.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub message: InvocationMessage,
    /// Target peers; required for client-realm invocations, ignored otherwise.
    pub recipients: Option<Vec<PeerId>>,
}

impl InvocationRequest {
    /// Address the request to `recipients`. An empty list is a valid no-op.
    pub fn to<I, P>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        self.recipients = Some(recipients.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.message.name
    }
}

/// Constructor for requests of one registered invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    name: Arc<str>,
    realm: Realm,
}

impl Invocation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn realm(&self) -> Realm {
        self.realm
    }

    /// Package `args` into a request. Client-realm requests still need
    /// [`InvocationRequest::to`] before the router accepts them.
    pub fn call(&self, args: impl IntoArgs) -> Result<InvocationRequest, RpcError> {
        let args = args.into_args().map_err(|e| RpcError::InvalidArguments {
            name: self.name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(InvocationRequest {
            message: InvocationMessage::new(self.name.as_ref(), args),
            recipients: None,
        })
    }
}

/// Handler bound to an invocation name.
pub type Handler<S> = Arc<dyn Fn(Call<'_, S>) -> Result<Outcome<S>, RpcError> + Send + Sync>;

/// Argument predicate checked before a handler runs.
pub type Validator = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// Per-invocation policy.
#[derive(Clone, Default)]
pub struct InvocationOptions {
    validate: Option<Validator>,
    allow_unauthenticated: bool,
}

impl InvocationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject invocations whose arguments fail `predicate`.
    pub fn validate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(predicate));
        self
    }

    /// Let peers that have not authenticated invoke this.
    pub fn allow_unauthenticated(mut self) -> Self {
        self.allow_unauthenticated = true;
        self
    }
}

impl fmt::Debug for InvocationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationOptions")
            .field("validate", &self.validate.is_some())
            .field("allow_unauthenticated", &self.allow_unauthenticated)
            .finish()
    }
}

/// A registered invocation.
pub struct InvocationDefinition<S: AppState> {
    pub name: String,
    pub realm: Realm,
    pub handler: Handler<S>,
    pub validate: Option<Validator>,
    pub allow_unauthenticated: bool,
}

impl<S: AppState> InvocationDefinition<S> {
    /// Check that `origin` may run this invocation.
    pub fn authorize(&self, origin: &Connection) -> Result<(), String> {
        if origin.authenticated || self.allow_unauthenticated {
            Ok(())
        } else {
            Err(format!(
                "Peer '{}' is not authorized to dispatch '{}'",
                origin.id, self.name
            ))
        }
    }

    /// Run the validation predicate, if any.
    pub fn check_args(&self, args: &[Value]) -> Result<(), String> {
        match &self.validate {
            Some(validate) if !validate(args) => {
                Err(format!("Invalid arguments for '{}'", self.name))
            }
            _ => Ok(()),
        }
    }
}

impl<S: AppState> fmt::Debug for InvocationDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationDefinition")
            .field("name", &self.name)
            .field("realm", &self.realm)
            .field("validate", &self.validate.is_some())
            .field("allow_unauthenticated", &self.allow_unauthenticated)
            .finish()
    }
}

/// Name-keyed table of invocation definitions.
pub struct InvocationRegistry<S: AppState> {
    definitions: HashMap<String, InvocationDefinition<S>>,
    collision_policy: CollisionPolicy,
}

impl<S: AppState> InvocationRegistry<S> {
    /// Create a new empty registry.
    pub fn new(collision_policy: CollisionPolicy) -> Self {
        Self {
            definitions: HashMap::new(),
            collision_policy,
        }
    }

    pub fn from_config(config: &RpcConfig) -> Self {
        Self::new(config.collision_policy)
    }

    /// Register `handler` under `name`.
    ///
    /// A blank name is a registration error. A duplicate name replaces the
    /// earlier definition under [`CollisionPolicy::Overwrite`] and is an
    /// error under [`CollisionPolicy::Reject`].
    pub fn register<F>(
        &mut self,
        name: &str,
        realm: Realm,
        handler: F,
        options: InvocationOptions,
    ) -> Result<Invocation, RpcError>
    where
        F: Fn(Call<'_, S>) -> Result<Outcome<S>, RpcError> + Send + Sync + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(RpcError::Registration(
                "Invocation name must not be empty".to_string(),
            ));
        }

        if self.definitions.contains_key(name) {
            match self.collision_policy {
                CollisionPolicy::Overwrite => {
                    warn!(
                        invocation = %name,
                        "RPC: name collides with an existing invocation, overriding"
                    );
                }
                CollisionPolicy::Reject => {
                    return Err(RpcError::Registration(format!(
                        "Invocation '{name}' is already registered"
                    )));
                }
            }
        }

        debug!(invocation = %name, realm = %realm, "RPC: registered invocation");
        self.definitions.insert(
            name.to_string(),
            InvocationDefinition {
                name: name.to_string(),
                realm,
                handler: Arc::new(handler),
                validate: options.validate,
                allow_unauthenticated: options.allow_unauthenticated,
            },
        );

        Ok(Invocation {
            name: Arc::from(name),
            realm,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&InvocationDefinition<S>> {
        self.definitions.get(name)
    }

    /// Constructor for an already registered name.
    pub fn invocation(&self, name: &str) -> Option<Invocation> {
        self.lookup(name).map(|def| Invocation {
            name: Arc::from(def.name.as_str()),
            realm: def.realm,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl<S: AppState> Default for InvocationRegistry<S> {
    fn default() -> Self {
        Self::new(CollisionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Log(Vec<String>);

    impl AppState for Log {
        type Mutation = String;

        fn apply(&mut self, mutation: String) {
            self.0.push(mutation);
        }
    }

    fn applied(tag: &'static str) -> impl Fn(Call<'_, Log>) -> Result<Outcome<Log>, RpcError> {
        move |_| Ok(Outcome::Applied(tag.to_string()))
    }

    fn run(def: &InvocationDefinition<Log>) -> String {
        let store = StateStore::new(Log::default());
        let args = Args::new(def.name.clone(), vec![]);
        let context =
            ExecutionContext::new(Connection::new(PeerId::from("h"), "host", true), true, None);
        let call = Call {
            args: &args,
            context: &context,
            state: &store.reader(),
        };
        match (def.handler)(call).unwrap() {
            Outcome::Applied(m) => m,
            _ => panic!("expected Applied"),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = InvocationRegistry::<Log>::default();
        let ping = registry
            .register("ping", Realm::Server, applied("a"), InvocationOptions::new())
            .unwrap();
        assert_eq!(ping.name(), "ping");
        assert_eq!(ping.realm(), Realm::Server);

        let def = registry.lookup("ping").unwrap();
        assert_eq!(def.realm, Realm::Server);
        assert_eq!(run(def), "a");
        assert!(registry.lookup("pong").is_none());
    }

    #[test]
    fn test_overwrite_is_last_write_wins() {
        let mut registry = InvocationRegistry::<Log>::new(CollisionPolicy::Overwrite);
        registry
            .register("ping", Realm::Server, applied("first"), InvocationOptions::new())
            .unwrap();
        registry
            .register("ping", Realm::Multicast, applied("second"), InvocationOptions::new())
            .unwrap();

        assert_eq!(registry.len(), 1);
        let def = registry.lookup("ping").unwrap();
        assert_eq!(def.realm, Realm::Multicast);
        assert_eq!(run(def), "second");
    }

    #[test]
    fn test_reject_policy_refuses_duplicates() {
        let mut registry = InvocationRegistry::<Log>::new(CollisionPolicy::Reject);
        registry
            .register("ping", Realm::Server, applied("first"), InvocationOptions::new())
            .unwrap();
        let err = registry
            .register("ping", Realm::Server, applied("second"), InvocationOptions::new())
            .unwrap_err();
        assert!(matches!(err, RpcError::Registration(_)));
        assert_eq!(run(registry.lookup("ping").unwrap()), "first");
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut registry = InvocationRegistry::<Log>::default();
        for name in ["", "   "] {
            let err = registry
                .register(name, Realm::Server, applied("x"), InvocationOptions::new())
                .unwrap_err();
            assert!(matches!(err, RpcError::Registration(_)));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_call_packages_tuple_args() {
        let mut registry = InvocationRegistry::<Log>::default();
        let invocation = registry
            .register("move", Realm::Server, applied("x"), InvocationOptions::new())
            .unwrap();
        let request = invocation.call(("left", 3u32, true)).unwrap();
        assert_eq!(request.name(), "move");
        assert_eq!(request.message.args, vec![json!("left"), json!(3), json!(true)]);
        assert!(request.recipients.is_none());

        let empty = invocation.call(()).unwrap();
        assert!(empty.message.args.is_empty());
    }

    #[test]
    fn test_to_sets_recipients() {
        let mut registry = InvocationRegistry::<Log>::default();
        let notify = registry
            .register("notify", Realm::Client, applied("x"), InvocationOptions::new())
            .unwrap();
        let request = notify.call(("hi",)).unwrap().to(["a", "b"]);
        assert_eq!(
            request.recipients,
            Some(vec![PeerId::from("a"), PeerId::from("b")])
        );
        let none = notify.call(("hi",)).unwrap().to(Vec::<PeerId>::new());
        assert_eq!(none.recipients, Some(vec![]));
    }

    #[test]
    fn test_authorize_and_validate() {
        let mut registry = InvocationRegistry::<Log>::default();
        registry
            .register(
                "strict",
                Realm::Server,
                applied("x"),
                InvocationOptions::new().validate(|args| args.len() == 1 && args[0].is_u64()),
            )
            .unwrap();
        registry
            .register(
                "open",
                Realm::Server,
                applied("x"),
                InvocationOptions::new().allow_unauthenticated(),
            )
            .unwrap();

        let guest = Connection::new(PeerId::from("g"), "guest", false);
        let member = Connection::new(PeerId::from("m"), "member", true);

        let strict = registry.lookup("strict").unwrap();
        assert!(strict.authorize(&guest).is_err());
        assert!(strict.authorize(&member).is_ok());
        assert!(strict.check_args(&[json!(4)]).is_ok());
        assert!(strict.check_args(&[json!("four")]).is_err());
        assert!(strict.check_args(&[]).is_err());

        let open = registry.lookup("open").unwrap();
        assert!(open.authorize(&guest).is_ok());
        assert!(open.check_args(&[json!("anything")]).is_ok());
    }

    #[test]
    fn test_args_get() {
        let args = Args::new("t", vec![json!("peer-1"), json!(7)]);
        assert_eq!(args.get::<String>(0).unwrap(), "peer-1");
        assert_eq!(args.get::<u8>(1).unwrap(), 7);
        assert!(matches!(
            args.get::<u8>(0),
            Err(RpcError::InvalidArguments { .. })
        ));
        assert!(args.get::<String>(2).is_err());
    }

    #[test]
    fn test_invocation_lookup_by_name() {
        let mut registry = InvocationRegistry::<Log>::default();
        registry
            .register("b", Realm::Multicast, applied("x"), InvocationOptions::new())
            .unwrap();
        registry
            .register("a", Realm::Server, applied("x"), InvocationOptions::new())
            .unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.invocation("b").unwrap().realm(), Realm::Multicast);
        assert!(registry.invocation("c").is_none());
    }
}
