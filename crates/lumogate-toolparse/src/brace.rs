/// Recovers complete top-level JSON objects from an arbitrary, possibly
/// chunk-split, byte stream by tracking brace depth and string state
/// character by character. Text outside any `{...}` span (prose, markdown)
/// is dropped from the object buffer but still available via
/// [`BraceDepthTracker::take_skipped`] for callers that want it.
#[derive(Debug, Default)]
pub struct BraceDepthTracker {
    buffer: String,
    skipped: String,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl BraceDepthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more text through the tracker. Returns every JSON object whose
    /// closing brace was found in this call (a chunk may close more than
    /// one object, or zero).
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        let mut completed = Vec::new();

        for c in chunk.chars() {
            if self.depth == 0 {
                if c == '{' {
                    self.depth = 1;
                    self.buffer.clear();
                    self.buffer.push(c);
                } else {
                    self.skipped.push(c);
                }
                continue;
            }

            self.buffer.push(c);

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match c {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        completed.push(std::mem::take(&mut self.buffer));
                    }
                }
                _ => {}
            }
        }

        completed
    }

    /// True while a `{` has been seen without its matching `}`.
    pub fn in_object(&self) -> bool {
        self.depth > 0
    }

    /// Non-JSON text observed outside any object span, since the last call.
    pub fn take_skipped(&mut self) -> String {
        std::mem::take(&mut self.skipped)
    }
}
