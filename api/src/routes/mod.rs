pub mod health;
pub mod nudges;
pub mod outbox;
