pub mod jsonrpc;
pub mod payment;
pub mod postback;

pub use jsonrpc::{
    JsonRpcErrorObject, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, SubscriptionNotification,
    SubscriptionParams,
};
pub use payment::{CreatePaymentRequest, CreatePaymentResponse, PaymentStatusResponse};
pub use postback::PostbackPayload;
