//! Input-redirect stack: the "ask a question, route the next line to this
//! callback" pattern used by login prompts, editors, and any other
//! sequence that needs to intercept the session's next command instead of
//! handing it to the normal interpreter.

/// Flags attached to one redirect entry. A small const-bitset newtype
/// rather than pulling in a dependency for three bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedirectFlags(u8);

impl RedirectFlags {
    pub const NOECHO_REQ: RedirectFlags = RedirectFlags(0x01);
    pub const CHARMODE_REQ: RedirectFlags = RedirectFlags(0x02);
    pub const IGNORE_BANG: RedirectFlags = RedirectFlags(0x04);

    pub fn contains(self, other: RedirectFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RedirectFlags) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for RedirectFlags {
    type Output = RedirectFlags;
    fn bitor(self, rhs: RedirectFlags) -> RedirectFlags {
        RedirectFlags(self.0 | rhs.0)
    }
}

/// One pending redirect: the callback id (owned by the session layer, kept
/// here only as an opaque handle) plus its flags.
pub struct RedirectEntry {
    pub callback: Box<dyn FnMut(&str) -> RedirectOutcome>,
    pub flags: RedirectFlags,
}

/// What a redirect callback asks the stack to do next.
pub enum RedirectOutcome {
    /// Nothing further: if the callback didn't push a new redirect, the
    /// stack pops back to whatever was underneath.
    Done,
    /// The callback pushed its own follow-up redirect; the stack must not
    /// reset echo/charmode to the next entry's flags since this one is
    /// still fresh.
    Continued,
}

#[derive(Default)]
pub struct RedirectStack {
    entries: Vec<RedirectEntry>,
}

impl RedirectStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, callback: Box<dyn FnMut(&str) -> RedirectOutcome>, flags: RedirectFlags) {
        self.entries.push(RedirectEntry { callback, flags });
    }

    /// Flags of the entry that's currently on top, or zero if the stack is
    /// empty.
    pub fn top_flags(&self) -> RedirectFlags {
        self.entries.last().map(|e| e.flags).unwrap_or_default()
    }

    /// Decide whether `line` should go to the top redirect or be passed
    /// through to the normal command interpreter, applying the bang-escape
    /// rule: a leading `!` bypasses every redirect on the stack as long as
    /// at least one entry (anywhere in the stack, not just the top) has
    /// `IGNORE_BANG` clear. Only when every entry insists on `IGNORE_BANG`
    /// does the `!` stay part of the line handed to the top redirect.
    pub fn route<'a>(&self, line: &'a str) -> RouteDecision<'a> {
        if self.entries.is_empty() {
            return RouteDecision::Normal(line);
        }
        if let Some(rest) = line.strip_prefix('!') {
            let any_entry_allows_bang =
                self.entries.iter().any(|e| !e.flags.contains(RedirectFlags::IGNORE_BANG));
            if any_entry_allows_bang {
                return RouteDecision::Normal(rest);
            }
        }
        RouteDecision::Redirect(line)
    }

    /// Pop the top redirect and run it, returning whether echo/charmode
    /// should now reset to the next entry's flags (or to zero).
    ///
    /// Before invocation the caller OR's `NOECHO_STALE`/`CHARMODE_STALE`
    /// into the session's noecho flags; after invocation, if the stale bit
    /// is still set (the callback didn't push a fresh redirect), the
    /// caller resets echo/charmode to `resulting_flags()`.
    pub fn invoke_top(&mut self, line: &str) -> Option<RedirectOutcome> {
        let mut entry = self.entries.pop()?;
        Some((entry.callback)(line))
    }

    /// Flags the session's noecho/charmode wire state should settle to
    /// after a redirect pop: the new top's flags, or none if the stack is
    /// now empty.
    pub fn resulting_flags(&self) -> RedirectFlags {
        self.top_flags()
    }
}

pub enum RouteDecision<'a> {
    Normal(&'a str),
    Redirect(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stack_routes_to_normal_interpreter() {
        let stack = RedirectStack::new();
        match stack.route("look") {
            RouteDecision::Normal(s) => assert_eq!(s, "look"),
            _ => panic!("expected normal routing"),
        }
    }

    #[test]
    fn bang_prefix_bypasses_redirect_when_not_ignored() {
        let mut stack = RedirectStack::new();
        stack.push(Box::new(|_| RedirectOutcome::Done), RedirectFlags::NOECHO_REQ);
        match stack.route("!look") {
            RouteDecision::Normal(s) => assert_eq!(s, "look"),
            _ => panic!("expected bang bypass"),
        }
    }

    #[test]
    fn bang_prefix_stays_redirected_when_ignore_bang_set() {
        let mut stack = RedirectStack::new();
        stack.push(Box::new(|_| RedirectOutcome::Done), RedirectFlags::IGNORE_BANG);
        match stack.route("!password") {
            RouteDecision::Redirect(s) => assert_eq!(s, "!password"),
            _ => panic!("expected redirect to keep the bang"),
        }
    }

    #[test]
    fn bang_prefix_bypasses_when_any_stacked_entry_allows_it() {
        let mut stack = RedirectStack::new();
        stack.push(Box::new(|_| RedirectOutcome::Done), RedirectFlags::NOECHO_REQ);
        stack.push(Box::new(|_| RedirectOutcome::Done), RedirectFlags::IGNORE_BANG);
        // Top entry ignores the bang, but the one underneath doesn't, so
        // the whole stack is bypassed.
        match stack.route("!look") {
            RouteDecision::Normal(s) => assert_eq!(s, "look"),
            _ => panic!("expected bang bypass from the non-top entry"),
        }
    }

    #[test]
    fn invoke_top_pops_and_runs_callback() {
        let mut stack = RedirectStack::new();
        stack.push(
            Box::new(|line| {
                assert_eq!(line, "answer");
                RedirectOutcome::Done
            }),
            RedirectFlags::default(),
        );
        assert!(!stack.is_empty());
        let outcome = stack.invoke_top("answer");
        assert!(matches!(outcome, Some(RedirectOutcome::Done)));
        assert!(stack.is_empty());
    }

    #[test]
    fn flags_combine_with_bitor() {
        let f = RedirectFlags::NOECHO_REQ | RedirectFlags::CHARMODE_REQ;
        assert!(f.contains(RedirectFlags::NOECHO_REQ));
        assert!(f.contains(RedirectFlags::CHARMODE_REQ));
        assert!(!f.contains(RedirectFlags::IGNORE_BANG));
    }
}
