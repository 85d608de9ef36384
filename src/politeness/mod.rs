//! Politeness: per-domain rate limiting and robots.txt compliance

mod gate;
mod robots;
mod source;

pub use gate::{DomainOutcome, DomainPolicy, PolitenessGate};
pub use robots::RobotsRules;
pub use source::{fetch_rules, HttpRobotsSource, RobotsSource, StaticRobotsSource};
