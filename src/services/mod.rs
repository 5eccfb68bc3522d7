pub mod access;
pub mod appointment;
pub mod audit;
pub mod ledger;
pub mod notifier;

#[cfg(test)]
pub mod testing;
