//! Macros for the [Tandem] SFU client.
//!
//! [Tandem]: https://docs.rs/tandem

#![deny(broken_intra_doc_links)]

mod dispatchable;

use proc_macro::TokenStream;

/// Generates a `{Enum}Handler` trait for an `enum` of events along with an
/// `{Enum}::dispatch_with()` routing every event to its handler method.
///
/// Each handler method is named after its variant, `snake_case`d and
/// prefixed with `on_`:
/// - named fields become method arguments;
/// - the only field of a tuple variant is passed as `data`;
/// - unit variants produce methods without arguments.
///
/// Tuple variants with more than one field are rejected.
///
/// ```
/// use tandem_macro::dispatchable;
///
/// #[dispatchable]
/// enum Signal {
///     Joined { session_id: String },
///     Trickle(String),
///     GoAway,
/// }
///
/// #[derive(Default)]
/// struct Roster {
///     sessions: Vec<String>,
///     candidates: usize,
///     draining: bool,
/// }
///
/// impl SignalHandler for Roster {
///     fn on_joined(&mut self, session_id: String) {
///         self.sessions.push(session_id);
///     }
///
///     fn on_trickle(&mut self, _: String) {
///         self.candidates += 1;
///     }
///
///     fn on_go_away(&mut self) {
///         self.draining = true;
///     }
/// }
///
/// let mut roster = Roster::default();
/// Signal::Joined { session_id: "s1".into() }.dispatch_with(&mut roster);
/// Signal::Trickle("candidate".into()).dispatch_with(&mut roster);
/// Signal::GoAway.dispatch_with(&mut roster);
///
/// assert_eq!(roster.sessions, ["s1"]);
/// assert_eq!(roster.candidates, 1);
/// assert!(roster.draining);
/// ```
#[proc_macro_attribute]
pub fn dispatchable(_: TokenStream, input: TokenStream) -> TokenStream {
    dispatchable::derive(input)
        .unwrap_or_else(|e| e.to_compile_error().into())
}
