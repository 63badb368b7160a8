pub mod imap;

#[cfg(test)]
pub mod memory;
