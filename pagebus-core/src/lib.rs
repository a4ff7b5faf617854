//! # pagebus-core
//!
//! Scanned pages in, documents out, over a size-limited message broker.
//!
//! The producer side watches an inbound directory of `<prefix>_<n>.<ext>` page
//! files, orders them ([`sequencer`]), assembles them into PDF documents
//! ([`assembler`], [`render`]) and sends each document over the broker
//! ([`transport`]), splitting it into chunks when the broker rejects it as too
//! large. The consumer side reassembles and persists documents ([`consumer`]).
//! Both sides share runtime settings pushed over a broker topic ([`settings`])
//! and report their status on a central queue ([`heartbeat`]).
//!
//! Broker access goes through the [`contract::Broker`] trait; [`broker::memory`]
//! provides an in-process implementation.

pub mod assembler;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod contract;
pub mod error;
pub mod heartbeat;
pub mod producer;
pub mod render;
pub mod retry;
pub mod sequencer;
pub mod settings;
pub mod status;
pub mod transport;
