//! The greeting service contract shared by server and client.

use async_trait::async_trait;

use crate::errors::HandlerError;
use crate::schema::{FieldDescriptor, FieldType, Message, MessageDescriptor, Record};

/// Request for the greeting operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloRequest {
    pub name: String,
}

impl HelloRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Response from the greeting operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloResponse {
    pub message: String,
}

const HELLO_REQUEST_FIELDS: &[FieldDescriptor] = &[FieldDescriptor::new("name", FieldType::String)];

const HELLO_RESPONSE_FIELDS: &[FieldDescriptor] =
    &[FieldDescriptor::new("message", FieldType::String)];

impl Message for HelloRequest {
    const DESCRIPTOR: MessageDescriptor = MessageDescriptor {
        name: "HelloRequest",
        fields: HELLO_REQUEST_FIELDS,
    };

    fn to_record(&self) -> Record {
        Record::new().with("name", self.name.as_str())
    }

    fn from_record(mut record: Record) -> Self {
        Self {
            name: record.take_string("name"),
        }
    }
}

impl Message for HelloResponse {
    const DESCRIPTOR: MessageDescriptor = MessageDescriptor {
        name: "HelloResponse",
        fields: HELLO_RESPONSE_FIELDS,
    };

    fn to_record(&self) -> Record {
        Record::new().with("message", self.message.as_str())
    }

    fn from_record(mut record: Record) -> Self {
        Self {
            message: record.take_string("message"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    /// Routing key on the wire, `<service>.<method>`.
    pub path: &'static str,
    pub input: MessageDescriptor,
    pub output: MessageDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub methods: &'static [MethodDescriptor],
}

impl ServiceDescriptor {
    pub fn method(&self, path: &str) -> Option<&'static MethodDescriptor> {
        self.methods.iter().find(|method| method.path == path)
    }
}

pub const SAY_HELLO: MethodDescriptor = MethodDescriptor {
    name: "SayHello",
    path: "Greeter.SayHello",
    input: HelloRequest::DESCRIPTOR,
    output: HelloResponse::DESCRIPTOR,
};

pub const GREETER: ServiceDescriptor = ServiceDescriptor {
    name: "Greeter",
    methods: &[SAY_HELLO],
};

/// Handler trait implemented by greeting services.
#[async_trait]
pub trait Greeter: Send + Sync + 'static {
    async fn say_hello(&self, request: HelloRequest) -> Result<HelloResponse, HandlerError>;
}

/// The stock greeter: `"Hello, " + name`. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloGreeter;

impl HelloGreeter {
    pub fn greet(request: &HelloRequest) -> HelloResponse {
        HelloResponse {
            message: format!("Hello, {}", request.name),
        }
    }
}

#[async_trait]
impl Greeter for HelloGreeter {
    async fn say_hello(&self, request: HelloRequest) -> Result<HelloResponse, HandlerError> {
        Ok(Self::greet(&request))
    }
}
