//! REST clients for the two external collaborators: the payment processor (refunds,
//! voids, continuation submissions) and the checkout/order service.

mod checkout;
mod processor;

pub use checkout::CheckoutApi;
pub use processor::ProcessorApi;
