//! Dispatch of inbound calls to registered services.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::FutureExt;
use tracing::{debug, warn};

use super::{
    RegisterError,
    RpcError,
    codec::{ResponseHeader, ServerCodec},
    service::{MethodDescriptor, MethodResult, MethodTable, Service},
};

struct RegisteredService {
    methods: HashMap<String, MethodDescriptor>,
}

/// Registry of services plus the loop that serves them over a codec.
///
/// Services may be registered while a serve loop is already running; calls
/// arriving afterwards see them.
#[derive(Default)]
pub struct Server {
    services: DashMap<String, Arc<RegisteredService>>,
}

impl Server {
    /// Create a server with no services.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Publish `receiver` under [`Service::NAME`].
    ///
    /// # Errors
    ///
    /// See [`register_name`](Self::register_name).
    pub fn register<S: Service>(&self, receiver: S) -> Result<(), RegisterError> {
        self.register_name(S::NAME, receiver)
    }

    /// Publish `receiver` under `name`, overriding [`Service::NAME`].
    ///
    /// # Errors
    ///
    /// Fails when `name` is empty or contains `.`, when a method name is
    /// invalid, when the receiver declares no methods, or when `name` is
    /// already taken.
    pub fn register_name<S: Service>(&self, name: &str, receiver: S) -> Result<(), RegisterError> {
        if name.is_empty() || name.contains('.') {
            return Err(RegisterError::InvalidServiceName(name.to_owned()));
        }
        let mut table = MethodTable::new(receiver);
        S::methods(&mut table);
        let (methods, invalid) = table.into_parts();
        if let Some(method) = invalid.into_iter().next() {
            return Err(RegisterError::InvalidMethodName {
                service: name.to_owned(),
                method,
            });
        }
        if methods.is_empty() {
            return Err(RegisterError::NoMethods(name.to_owned()));
        }
        match self.services.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RegisterError::DuplicateService(name.to_owned())),
            Entry::Vacant(slot) => {
                debug!(service = name, methods = methods.len(), "service registered");
                slot.insert(Arc::new(RegisteredService { methods }));
                Ok(())
            }
        }
    }

    /// Argument and reply type names of `service_method`, if registered.
    #[must_use]
    pub fn describe(&self, service_method: &str) -> Option<(&'static str, &'static str)> {
        let (service, method) = service_method.rsplit_once('.')?;
        let service = self.services.get(service)?;
        let descriptor = service.methods.get(method)?;
        Some((descriptor.arg_type(), descriptor.reply_type()))
    }

    fn lookup(&self, service_method: &str) -> Result<Arc<RegisteredService>, String> {
        let Some((service, method)) = service_method.rsplit_once('.') else {
            return Err(format!(
                "rpc: service/method request ill-formed: {service_method}"
            ));
        };
        let Some(entry) = self.services.get(service) else {
            return Err(format!("rpc: can't find service {service_method}"));
        };
        if !entry.methods.contains_key(method) {
            return Err(format!("rpc: can't find method {service_method}"));
        }
        Ok(Arc::clone(entry.value()))
    }

    /// Serve requests read from `codec` until it stops delivering them.
    ///
    /// Each request runs as its own task, so a slow method does not hold up
    /// others. Dispatch failures, including a panicking method, are answered
    /// with an error response and do not stop the loop.
    ///
    /// # Errors
    ///
    /// Returns the codec error that stopped the loop, such as an undecodable
    /// request header. A closed transport ends the loop with `Ok`.
    pub async fn serve_codec<C: ServerCodec>(self: Arc<Self>, codec: C) -> Result<(), RpcError> {
        let codec = Arc::new(codec);
        let stopped = loop {
            let header = match codec.read_request_header().await {
                Ok(header) => header,
                Err(e) => break e,
            };
            let body = match codec.read_request_body().await {
                Ok(body) => body,
                Err(e) => break e,
            };
            let service = self.lookup(&header.service_method);
            let codec = Arc::clone(&codec);
            tokio::spawn(async move {
                let outcome = match service {
                    Ok(service) => dispatch(&service, &header.service_method, body).await,
                    Err(e) => Err(e),
                };
                let (reply, error) = match outcome {
                    Ok(reply) => (reply, String::new()),
                    Err(error) => (Vec::new(), error),
                };
                let response = ResponseHeader {
                    service_method: header.service_method,
                    seq: header.seq,
                    error,
                };
                if let Err(e) = codec.write_response(&response, &reply).await {
                    debug!(seq = response.seq, error = %e, "failed to send response");
                }
            });
        };
        if let Err(e) = codec.close().await {
            debug!(error = %e, "server codec close failed");
        }
        if stopped.is_closed() { Ok(()) } else { Err(stopped) }
    }
}

/// Invoke the method named by `service_method`, turning a panic into an error
/// for the caller.
async fn dispatch(service: &RegisteredService, service_method: &str, body: Bytes) -> MethodResult {
    let Some(method) = service_method
        .rsplit_once('.')
        .and_then(|(_, m)| service.methods.get(m))
    else {
        return Err(format!("rpc: can't find method {service_method}"));
    };
    match AssertUnwindSafe(async { method.invoke(body).await }).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(service_method, "method panicked");
            Err(format!("rpc: method {service_method} panicked"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use bincode::error::DecodeError;
    use bytes::Bytes;
    use rstest::{fixture, rstest};
    use tokio::{sync::mpsc, time::timeout};

    use super::Server;
    use crate::{
        message::Message,
        rpc::{
            MethodTable,
            RegisterError,
            RpcError,
            Service,
            codec::{RequestHeader, ResponseHeader, ServerCodec},
        },
    };

    struct Echo;

    impl Service for Echo {
        const NAME: &'static str = "Echo";

        fn methods(table: &mut MethodTable<Self>) {
            table
                .method("Say", |_: Arc<Self>, text: String| async move { Ok::<_, String>(text) })
                .method("Explode", |_: Arc<Self>, (): ()| async move {
                    if true {
                        panic!("handler blew up");
                    }
                    Ok::<_, String>(())
                });
        }
    }

    type Request = Result<(RequestHeader, Bytes), RpcError>;

    /// Codec replaying scripted requests and recording responses.
    struct Scripted {
        requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<Request>>,
        body: Mutex<Bytes>,
        responses: mpsc::UnboundedSender<ResponseHeader>,
    }

    #[async_trait]
    impl ServerCodec for Scripted {
        async fn read_request_header(&self) -> Result<RequestHeader, RpcError> {
            let next = self.requests.lock().await.recv().await.unwrap_or(Err(RpcError::Closed));
            let (header, body) = next?;
            *self.body.lock().expect("body lock") = body;
            Ok(header)
        }

        async fn read_request_body(&self) -> Result<Bytes, RpcError> {
            Ok(std::mem::take(&mut *self.body.lock().expect("body lock")))
        }

        async fn write_response(&self, header: &ResponseHeader, _: &[u8]) -> Result<(), RpcError> {
            self.responses.send(header.clone()).map_err(|_| RpcError::Closed)
        }

        async fn close(&self) -> Result<(), RpcError> { Ok(()) }
    }

    fn scripted(
        requests: Vec<Request>,
    ) -> (Scripted, mpsc::UnboundedReceiver<ResponseHeader>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        for request in requests {
            requests_tx.send(request).expect("queue open");
        }
        let (responses, responses_rx) = mpsc::unbounded_channel();
        let codec = Scripted {
            requests: tokio::sync::Mutex::new(requests_rx),
            body: Mutex::new(Bytes::new()),
            responses,
        };
        (codec, responses_rx)
    }

    fn request(service_method: &str, seq: u64, args: &impl Message) -> Request {
        let header = RequestHeader {
            service_method: service_method.to_owned(),
            seq,
        };
        Ok((header, Bytes::from(args.to_bytes().expect("encode args"))))
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn panicking_method_gets_an_error_response() {
        let server = Arc::new(Server::new());
        server.register(Echo).expect("register Echo");
        let (codec, mut responses) = scripted(vec![
            request("Echo.Explode", 1, &()),
            request("Echo.Say", 2, &"after".to_owned()),
        ]);
        let serving = tokio::spawn(Arc::clone(&server).serve_codec(codec));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let response = timeout(WAIT, responses.recv())
                .await
                .expect("response in time")
                .expect("response written");
            seen.push((response.seq, response.error));
        }
        seen.sort();
        assert_eq!(seen[0], (1, "rpc: method Echo.Explode panicked".to_owned()));
        assert_eq!(seen[1], (2, String::new()));

        let stopped = timeout(WAIT, serving).await.expect("loop ends").expect("serve task");
        assert!(stopped.is_ok(), "{stopped:?}");
    }

    #[tokio::test]
    async fn undecodable_header_stops_serving_with_the_error() {
        let server = Arc::new(Server::new());
        server.register(Echo).expect("register Echo");
        let (codec, _responses) = scripted(vec![
            Err(RpcError::Decode(DecodeError::UnexpectedEnd { additional: 1 })),
            request("Echo.Say", 1, &"never".to_owned()),
        ]);

        let stopped = timeout(WAIT, server.serve_codec(codec)).await.expect("loop ends");
        assert!(matches!(stopped, Err(RpcError::Decode(_))), "{stopped:?}");
    }

    struct Silent;

    impl Service for Silent {
        const NAME: &'static str = "Silent";

        fn methods(_: &mut MethodTable<Self>) {}
    }

    struct Dotted;

    impl Service for Dotted {
        const NAME: &'static str = "Dotted";

        fn methods(table: &mut MethodTable<Self>) {
            table.method("a.b", |_: Arc<Self>, n: u8| async move { Ok::<_, String>(n) });
        }
    }

    #[fixture]
    fn server() -> Server { Server::new() }

    #[rstest]
    fn registers_under_type_name(server: Server) {
        server.register(Echo).expect("register Echo");
        assert_eq!(
            server.describe("Echo.Say"),
            Some(("alloc::string::String", "alloc::string::String"))
        );
    }

    #[rstest]
    fn register_name_overrides_type_name(server: Server) {
        server.register_name("Parrot", Echo).expect("register Parrot");
        assert!(server.describe("Parrot.Say").is_some());
        assert!(server.describe("Echo.Say").is_none());
    }

    #[rstest]
    #[case::empty("")]
    #[case::dotted("A.B")]
    fn rejects_invalid_service_names(server: Server, #[case] name: &str) {
        assert_eq!(
            server.register_name(name, Echo),
            Err(RegisterError::InvalidServiceName(name.to_owned()))
        );
    }

    #[rstest]
    fn rejects_services_without_methods(server: Server) {
        assert_eq!(
            server.register(Silent),
            Err(RegisterError::NoMethods("Silent".to_owned()))
        );
    }

    #[rstest]
    fn rejects_invalid_method_names(server: Server) {
        assert!(matches!(
            server.register(Dotted),
            Err(RegisterError::InvalidMethodName { .. })
        ));
    }

    #[rstest]
    fn rejects_duplicates(server: Server) {
        server.register(Echo).expect("first registration");
        assert_eq!(
            server.register(Echo),
            Err(RegisterError::DuplicateService("Echo".to_owned()))
        );
    }

    #[rstest]
    #[case::ill_formed("EchoSay", "rpc: service/method request ill-formed: EchoSay")]
    #[case::no_service("Nope.Say", "rpc: can't find service Nope.Say")]
    #[case::no_method("Echo.Shout", "rpc: can't find method Echo.Shout")]
    fn lookup_failures_name_the_target(server: Server, #[case] target: &str, #[case] expected: &str) {
        server.register(Echo).expect("register Echo");
        assert_eq!(server.lookup(target).err().as_deref(), Some(expected));
    }
}
