//! User-confirmation capability, injected rather than read straight off a
//! terminal. Lets the Reconciler's prompt-driven rows (§4.6) be exercised
//! by tests without a TTY, mirroring how the source swaps `input` for a
//! scripted stand-in during its own tests.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAnswer {
    Yes,
    No,
    Abort,
}

pub trait UserConfirm {
    /// Ask a yes/no/abort question.
    fn confirm(&self, prompt: &str) -> ConfirmAnswer;

    /// Ask the user to pick one of a fixed set of options, returning the
    /// chosen option's key (first element of the pair). `options` is
    /// `(key, label)`.
    fn menu(&self, title: &str, options: &[(&str, &str)]) -> String;
}

/// Real terminal prompts via stdin. Suppressed in `debug_mode`, where every
/// gate resolves to the least destructive answer instead of blocking —
/// matching `DEBUG=1`'s "suppress interactive press-ENTER gates" contract.
pub struct TerminalConfirm {
    pub debug_mode: bool,
}

impl TerminalConfirm {
    pub fn new(debug_mode: bool) -> Self {
        Self { debug_mode }
    }

    fn read_line(&self, prompt: &str) -> String {
        use std::io::Write as _;
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        line.trim().to_string()
    }
}

impl UserConfirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> ConfirmAnswer {
        if self.debug_mode {
            return ConfirmAnswer::Yes;
        }
        loop {
            let answer = self.read_line(&format!("{prompt} [y/n/a] "));
            match answer.to_lowercase().as_str() {
                "y" | "yes" => return ConfirmAnswer::Yes,
                "n" | "no" => return ConfirmAnswer::No,
                "a" | "abort" => return ConfirmAnswer::Abort,
                _ => continue,
            }
        }
    }

    fn menu(&self, title: &str, options: &[(&str, &str)]) -> String {
        if self.debug_mode {
            return options.first().map(|(k, _)| k.to_string()).unwrap_or_default();
        }
        loop {
            println!("{title}");
            for (key, label) in options {
                println!("  [{key}] {label}");
            }
            let answer = self.read_line("> ");
            if options.iter().any(|(k, _)| *k == answer) {
                return answer;
            }
        }
    }
}

/// Test double with a pre-loaded queue of answers, consumed in order.
/// Panics if asked for more answers than were scripted — a test that
/// under-scripts its confirm calls is a test with a wrong assumption
/// about the flow under test.
pub struct ScriptedConfirm {
    confirms: std::cell::RefCell<std::collections::VecDeque<ConfirmAnswer>>,
    menus: std::cell::RefCell<std::collections::VecDeque<String>>,
}

impl ScriptedConfirm {
    pub fn new(confirms: Vec<ConfirmAnswer>, menus: Vec<&str>) -> Self {
        Self {
            confirms: std::cell::RefCell::new(confirms.into()),
            menus: std::cell::RefCell::new(menus.into_iter().map(String::from).collect()),
        }
    }
}

impl UserConfirm for ScriptedConfirm {
    fn confirm(&self, _prompt: &str) -> ConfirmAnswer {
        self.confirms
            .borrow_mut()
            .pop_front()
            .expect("ScriptedConfirm ran out of scripted confirm() answers")
    }

    fn menu(&self, _title: &str, _options: &[(&str, &str)]) -> String {
        self.menus
            .borrow_mut()
            .pop_front()
            .expect("ScriptedConfirm ran out of scripted menu() answers")
    }
}

/// Never blocks on a prompt: every `confirm` resolves to `Abort` and every
/// `menu` returns a key nothing matches, so `Reconciler::execute` always
/// surfaces `ReconcileError::UserAborted` instead of reading stdin. Used for
/// `--non-interactive`, where a tty-less run (cron, a script) would
/// otherwise hang on the first ambiguous recordbook state.
pub struct NonInteractiveConfirm;

impl UserConfirm for NonInteractiveConfirm {
    fn confirm(&self, _prompt: &str) -> ConfirmAnswer {
        ConfirmAnswer::Abort
    }

    fn menu(&self, _title: &str, _options: &[(&str, &str)]) -> String {
        String::new()
    }
}
