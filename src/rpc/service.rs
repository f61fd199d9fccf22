//! Service receivers and their method tables.
//!
//! A receiver exposes methods by filling a [`MethodTable`] once, when it is
//! registered. Each entry records the argument and reply type names and a
//! type-erased invocation function, so dispatching an inbound call is a plain
//! table lookup.

use std::{any::type_name, collections::HashMap, fmt, future::Future, sync::Arc};

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};

use crate::message::Message;

/// Outcome of invoking a method: encoded reply bytes or an error string sent
/// back to the caller.
pub(crate) type MethodResult = Result<Vec<u8>, String>;

type Invoke = Box<dyn Fn(Bytes) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// A value whose methods can be called remotely.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use bidirpc::rpc::{MethodTable, Service};
///
/// struct Echo;
///
/// impl Service for Echo {
///     const NAME: &'static str = "Echo";
///
///     fn methods(table: &mut MethodTable<Self>) {
///         table.method("Say", |_: Arc<Self>, text: String| async move {
///             Ok::<_, String>(text)
///         });
///     }
/// }
/// ```
pub trait Service: Send + Sync + Sized + 'static {
    /// Name callers use in `Service.Method` unless registered under another.
    const NAME: &'static str;

    /// Declare the methods callable on this receiver.
    fn methods(table: &mut MethodTable<Self>);
}

/// Registered method: type descriptors plus the invocation function.
pub struct MethodDescriptor {
    arg_type: &'static str,
    reply_type: &'static str,
    invoke: Invoke,
}

impl MethodDescriptor {
    /// Name of the argument type.
    #[must_use]
    pub fn arg_type(&self) -> &'static str { self.arg_type }

    /// Name of the reply type.
    #[must_use]
    pub fn reply_type(&self) -> &'static str { self.reply_type }

    pub(crate) fn invoke(&self, body: Bytes) -> BoxFuture<'static, MethodResult> {
        (self.invoke)(body)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .finish_non_exhaustive()
    }
}

/// Builder collecting the methods of one receiver.
pub struct MethodTable<S> {
    receiver: Arc<S>,
    methods: HashMap<String, MethodDescriptor>,
    invalid: Vec<String>,
}

impl<S: Send + Sync + 'static> MethodTable<S> {
    pub(crate) fn new(receiver: S) -> Self {
        Self {
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
            invalid: Vec::new(),
        }
    }

    /// Expose `handler` as method `name`.
    ///
    /// The handler receives the shared receiver and the decoded argument. An
    /// `Err` is rendered with `Display` and returned to the caller as a
    /// remote error. Registering the same name twice keeps the last handler.
    pub fn method<A, R, E, F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        A: Message + Send + 'static,
        R: Message + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        if name.is_empty() || name.contains('.') {
            self.invalid.push(name.to_owned());
            return self;
        }
        let receiver = Arc::clone(&self.receiver);
        let invoke: Invoke = Box::new(move |body: Bytes| match A::from_bytes(&body) {
            Ok((args, _)) => {
                let call = handler(Arc::clone(&receiver), args);
                async move {
                    match call.await {
                        Ok(reply) => reply
                            .to_bytes()
                            .map_err(|e| format!("rpc: encoding reply: {e}")),
                        Err(e) => Err(e.to_string()),
                    }
                }
                .boxed()
            }
            Err(e) => future::ready(Err(format!("rpc: decoding arguments: {e}"))).boxed(),
        });
        self.methods.insert(
            name.to_owned(),
            MethodDescriptor {
                arg_type: type_name::<A>(),
                reply_type: type_name::<R>(),
                invoke,
            },
        );
        self
    }

    pub(crate) fn into_parts(self) -> (HashMap<String, MethodDescriptor>, Vec<String>) {
        (self.methods, self.invalid)
    }
}
