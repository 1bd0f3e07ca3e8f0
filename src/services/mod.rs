pub mod feed;
pub mod push;
pub mod responder;
