use std::io::{self, Write};

use chrono::Local;
use transcript::{ChatState, Message, Role};

/// Appends the transcript to a terminal as it grows.
///
/// Only the streaming assistant message ever changes after it is shown, and
/// its content only grows, so each render writes just the unseen suffix.
pub struct TerminalView<W: Write> {
    out: W,
    rendered: usize,
    printed_len: usize,
    line_open: bool,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            rendered: 0,
            printed_len: 0,
            line_open: false,
        }
    }

    pub fn render(&mut self, state: &ChatState) -> io::Result<()> {
        let messages = state.transcript().messages();

        if let Some(last) = self.rendered.checked_sub(1).and_then(|i| messages.get(i)) {
            if let Some(suffix) = last.content.get(self.printed_len..) {
                if !suffix.is_empty() && !self.line_open {
                    write!(self.out, "{}", prompt_prefix(last.role))?;
                }
                self.write_content(suffix)?;
                self.printed_len = last.content.len();
            }
        }

        for message in messages.iter().skip(self.rendered) {
            self.end_line()?;
            self.write_header(message)?;
            self.write_content(&message.content)?;
            self.printed_len = message.content.len();
            self.rendered += 1;
        }

        if !state.is_loading() {
            self.end_line()?;
        }
        self.out.flush()
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        self.end_line()?;
        writeln!(self.out, "({text})")?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self, message: &Message) -> io::Result<()> {
        let label = match message.role {
            Role::User => "user@gemini",
            Role::Assistant => "gemini@ai",
        };
        let time = message.timestamp.with_timezone(&Local).format("%H:%M");
        writeln!(self.out, "{label}:~$ {time}")?;
        write!(self.out, "{}", prompt_prefix(message.role))?;
        self.line_open = true;
        Ok(())
    }

    fn write_content(&mut self, text: &str) -> io::Result<()> {
        if !text.is_empty() {
            self.out.write_all(text.as_bytes())?;
            self.line_open = true;
        }
        Ok(())
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.line_open {
            writeln!(self.out)?;
            self.line_open = false;
        }
        Ok(())
    }
}

fn prompt_prefix(role: Role) -> &'static str {
    match role {
        Role::User => "> ",
        Role::Assistant => "$ ",
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;
    use transcript::{ChatEvent, Effect, RequestId};

    use super::*;

    fn submitted(prompt: &str) -> (ChatState, RequestId) {
        let mut state = ChatState::new();
        state.update(ChatEvent::InputChanged(prompt.to_owned()));
        let request = state
            .update(ChatEvent::Submit)
            .into_iter()
            .find_map(|effect| match effect {
                Effect::SendPrompt { request, .. } => Some(request),
                _ => None,
            })
            .unwrap();
        (state, request)
    }

    fn fragment(request: RequestId, text: &'static str) -> ChatEvent {
        ChatEvent::Fragment {
            request,
            bytes: text.as_bytes().to_vec().into(),
        }
    }

    fn output(view: TerminalView<Vec<u8>>) -> String {
        String::from_utf8(view.into_inner()).unwrap()
    }

    #[test]
    fn view_streams_only_new_text() {
        let (mut state, request) = submitted("hello");
        let mut view = TerminalView::new(vec![]);

        view.render(&state).unwrap();
        for text in ["He", "llo", ", world!"] {
            state.update(fragment(request, text));
            view.render(&state).unwrap();
            view.render(&state).unwrap();
        }
        state.update(ChatEvent::StreamClosed { request });
        view.render(&state).unwrap();

        let out = output(view);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("user@gemini:~$ "));
        assert_eq!(lines[1], "> hello");
        assert!(lines[2].starts_with("gemini@ai:~$ "));
        assert_eq!(lines[3], "$ Hello, world!");
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn view_shows_failure_after_partial_reply() {
        let (mut state, request) = submitted("hello");
        let mut view = TerminalView::new(vec![]);

        state.update(fragment(request, "Hel"));
        view.render(&state).unwrap();
        state.update(ChatEvent::StreamFailed {
            request,
            reason: "reset".to_owned(),
        });
        view.render(&state).unwrap();

        let out = output(view);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[3], "$ Hel");
        assert!(lines[4].starts_with("gemini@ai:~$ "));
        assert_eq!(
            lines[5],
            format!("$ {}", transcript::CONNECTION_FAILED_MESSAGE)
        );
    }

    #[test]
    fn view_notice_starts_on_its_own_line() {
        let (mut state, request) = submitted("hello");
        let mut view = TerminalView::new(vec![]);
        state.update(fragment(request, "Hi"));
        view.render(&state).unwrap();

        view.notice("still streaming").unwrap();

        assert!(output(view).ends_with("$ Hi\n(still streaming)\n"));
    }

    #[test]
    fn view_resumes_reply_after_notice_with_prefix() {
        let (mut state, request) = submitted("hello");
        let mut view = TerminalView::new(vec![]);
        state.update(fragment(request, "Hi"));
        view.render(&state).unwrap();
        view.notice("still streaming").unwrap();

        state.update(fragment(request, " there"));
        view.render(&state).unwrap();
        state.update(ChatEvent::StreamClosed { request });
        view.render(&state).unwrap();

        assert!(output(view).ends_with("$ Hi\n(still streaming)\n$  there\n"));
    }
}
