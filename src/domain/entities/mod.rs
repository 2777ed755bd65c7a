pub mod action;
pub mod intent;
pub mod order;
pub mod trade;
pub mod venue;
