use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::response::DispatchError;

pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, DispatchError>> + Send>>;

/// Type-erased unary handler: encoded input in, encoded output or failure out.
pub(crate) type HandlerFn = Box<dyn Fn(Bytes) -> HandlerFuture + Send + Sync>;
