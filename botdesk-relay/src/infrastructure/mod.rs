pub mod broadcast;
pub mod persistence;
pub mod telegram;
