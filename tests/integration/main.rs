//! Scenarios of whole calls driven through fake platform primitives and a
//! scripted SFU.

#![forbid(non_ascii_idents, unsafe_code)]

mod fakes;
mod lifecycle;
mod negotiation;
mod recovery;
mod state;
