pub mod accounts;
pub mod ledgers;
pub mod system;
pub mod transactions;
pub mod webhooks;
