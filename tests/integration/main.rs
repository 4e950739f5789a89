//! End-to-end scenarios over the in-memory store.

mod helpers;

mod access_test;
mod bulk_test;
mod concurrency_test;
mod invitation_test;
mod resilience_test;
