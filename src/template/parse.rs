//! Template action parser.
//!
//! Templates are literal text with `{{ ... }}` actions:
//!
//! | Action                     | Meaning                                  |
//! |----------------------------|------------------------------------------|
//! | `{{ expr }}`               | evaluate and write the result            |
//! | `{{ if expr }} … {{ end }}`| conditional, with optional `{{ else }}`  |
//! | `{{ range expr }} … {{ end }}` | iterate, rebinding the dot           |
//! | `{{ define "name" }} … {{ end }}` | register a named template         |
//! | `{{ template "name" [expr] }}` | include a named template             |
//!
//! Expressions are string/integer literals, dotted variable paths resolved
//! against the current dot (`.`, `.Meta.date`), and function calls
//! `name arg…` with parenthesized nesting.

use anyhow::{Result, bail};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One parsed template body.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output(Expr),
    If {
        cond: Expr,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    Range {
        expr: Expr,
        body: Vec<Node>,
    },
    Include {
        name: String,
        arg: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    /// Dotted path from the current dot; empty segments = the dot itself
    Var(Vec<String>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// Dotted access on a parenthesized expression: `(data "x.json").key`
    Field {
        base: Box<Expr>,
        path: Vec<String>,
    },
}

/// Result of parsing one template file or body: its top-level nodes and
/// any `define`d named templates.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    pub body: Vec<Node>,
    pub defines: Vec<(String, Vec<Node>)>,
}

/// Parse a template body.
pub fn parse(src: &str) -> Result<Parsed> {
    let mut parser = Parser { src, pos: 0 };
    let mut parsed = Parsed::default();
    let (body, stop) = parser.parse_nodes(&mut parsed.defines, true)?;
    if let Some(stop) = stop {
        bail!("unexpected {{{{ {stop} }}}} outside a block");
    }
    parsed.body = body;
    Ok(parsed)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    /// Parse nodes until EOF or a block terminator (`end` / `else`).
    /// Returns the terminator keyword when one stopped the parse.
    fn parse_nodes(
        &mut self,
        defines: &mut Vec<(String, Vec<Node>)>,
        top_level: bool,
    ) -> Result<(Vec<Node>, Option<String>)> {
        let mut nodes = Vec::new();

        loop {
            let rest = &self.src[self.pos..];
            let Some(open) = rest.find(OPEN) else {
                if !rest.is_empty() {
                    nodes.push(Node::Text(rest.to_string()));
                }
                self.pos = self.src.len();
                return Ok((nodes, None));
            };

            if open > 0 {
                nodes.push(Node::Text(rest[..open].to_string()));
            }
            let action_start = self.pos + open + OPEN.len();
            let Some(close) = self.src[action_start..].find(CLOSE) else {
                bail!("unclosed action at byte {action_start}");
            };
            let action = self.src[action_start..action_start + close].trim();
            self.pos = action_start + close + CLOSE.len();

            let (keyword, rest) = split_keyword(action);
            match keyword {
                "end" | "else" => return Ok((nodes, Some(keyword.to_string()))),
                "if" => {
                    let cond = parse_expr(rest)?;
                    let (then_body, stop) = self.parse_nodes(defines, false)?;
                    let (else_body, stop) = match stop.as_deref() {
                        Some("else") => {
                            let (body, stop) = self.parse_nodes(defines, false)?;
                            (body, stop)
                        }
                        other => (Vec::new(), other.map(str::to_string)),
                    };
                    if stop.as_deref() != Some("end") {
                        bail!("`if` block is missing {{{{ end }}}}");
                    }
                    nodes.push(Node::If {
                        cond,
                        then_body,
                        else_body,
                    });
                }
                "range" => {
                    let expr = parse_expr(rest)?;
                    let (body, stop) = self.parse_nodes(defines, false)?;
                    if stop.as_deref() != Some("end") {
                        bail!("`range` block is missing {{{{ end }}}}");
                    }
                    nodes.push(Node::Range { expr, body });
                }
                "define" => {
                    if !top_level {
                        bail!("`define` is only allowed at the top level");
                    }
                    let name = parse_quoted(rest)?;
                    let (body, stop) = self.parse_nodes(defines, false)?;
                    if stop.as_deref() != Some("end") {
                        bail!("`define` block is missing {{{{ end }}}}");
                    }
                    defines.push((name, body));
                }
                "template" => {
                    let (name, arg_src) = take_quoted(rest)?;
                    let arg = if arg_src.trim().is_empty() {
                        None
                    } else {
                        Some(parse_expr(arg_src)?)
                    };
                    nodes.push(Node::Include { name, arg });
                }
                _ => nodes.push(Node::Output(parse_expr(action)?)),
            }
        }
    }
}

fn split_keyword(action: &str) -> (&str, &str) {
    match action.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (action, ""),
    }
}

fn parse_quoted(src: &str) -> Result<String> {
    let (name, rest) = take_quoted(src)?;
    if !rest.trim().is_empty() {
        bail!("unexpected trailing input after \"{name}\"");
    }
    Ok(name)
}

fn take_quoted(src: &str) -> Result<(String, &str)> {
    let src = src.trim_start();
    let Some(inner) = src.strip_prefix('"') else {
        bail!("expected a quoted name, got `{src}`");
    };
    let Some(end) = inner.find('"') else {
        bail!("unterminated string in `{src}`");
    };
    Ok((inner[..end].to_string(), &inner[end + 1..]))
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Var(Vec<String>),
    Str(String),
    Int(i64),
    LParen,
    RParen,
}

/// Parse a full expression: a bare term, or `name arg…` function call.
pub fn parse_expr(src: &str) -> Result<Expr> {
    let tokens = tokenize(src)?;
    let mut pos = 0;
    let expr = parse_call_or_term(&tokens, &mut pos)?;
    if pos != tokens.len() {
        bail!("unexpected trailing tokens in `{src}`");
    }
    Ok(expr)
}

fn parse_call_or_term(tokens: &[Token], pos: &mut usize) -> Result<Expr> {
    match tokens.get(*pos) {
        Some(Token::Ident(name)) => {
            let name = name.clone();
            *pos += 1;
            let mut args = Vec::new();
            while *pos < tokens.len() && tokens[*pos] != Token::RParen {
                args.push(parse_term(tokens, pos)?);
            }
            Ok(Expr::Call { name, args })
        }
        _ => parse_term(tokens, pos),
    }
}

fn parse_term(tokens: &[Token], pos: &mut usize) -> Result<Expr> {
    let Some(token) = tokens.get(*pos) else {
        bail!("expression ended unexpectedly");
    };
    *pos += 1;
    match token {
        Token::Str(s) => Ok(Expr::Str(s.clone())),
        Token::Int(n) => Ok(Expr::Int(*n)),
        Token::Var(path) => Ok(Expr::Var(path.clone())),
        Token::Ident(name) => Ok(Expr::Call {
            name: name.clone(),
            args: Vec::new(),
        }),
        Token::LParen => {
            let mut inner = parse_call_or_term(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Token::RParen) => {
                    *pos += 1;
                }
                _ => bail!("missing closing parenthesis"),
            }
            while let Some(Token::Var(path)) = tokens.get(*pos) {
                inner = Expr::Field {
                    base: Box::new(inner),
                    path: path.clone(),
                };
                *pos += 1;
            }
            Ok(inner)
        }
        Token::RParen => bail!("unexpected `)`"),
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let start = i + 1;
                let mut end = None;
                for (j, c) in chars.by_ref() {
                    if c == '"' {
                        end = Some(j);
                        break;
                    }
                }
                let Some(end) = end else {
                    bail!("unterminated string in `{src}`");
                };
                tokens.push(Token::Str(src[start..end].to_string()));
            }
            '.' => {
                let end = scan_word(src, i);
                let path = src[i + 1..end]
                    .split('.')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                tokens.push(Token::Var(path));
                while chars.peek().is_some_and(|&(j, _)| j < end) {
                    chars.next();
                }
            }
            '-' | '0'..='9' => {
                let end = scan_word(src, i);
                let n: i64 = src[i..end]
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid number `{}`", &src[i..end]))?;
                tokens.push(Token::Int(n));
                while chars.peek().is_some_and(|&(j, _)| j < end) {
                    chars.next();
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let end = scan_word(src, i);
                tokens.push(Token::Ident(src[i..end].to_string()));
                while chars.peek().is_some_and(|&(j, _)| j < end) {
                    chars.next();
                }
            }
            other => bail!("unexpected character `{other}` in `{src}`"),
        }
    }
    Ok(tokens)
}

/// Scan forward from `start` to the end of a word token.
fn scan_word(src: &str, start: usize) -> usize {
    src[start..]
        .char_indices()
        .skip(1)
        .find(|(_, c)| c.is_whitespace() || *c == '(' || *c == ')' || *c == '"')
        .map_or(src.len(), |(j, _)| start + j)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text() {
        let parsed = parse("hello world").unwrap();
        assert_eq!(parsed.body, vec![Node::Text("hello world".into())]);
    }

    #[test]
    fn test_parse_output_var() {
        let parsed = parse("a {{ .Meta.date }} b").unwrap();
        assert_eq!(
            parsed.body[1],
            Node::Output(Expr::Var(vec!["Meta".into(), "date".into()]))
        );
    }

    #[test]
    fn test_parse_dot_alone() {
        let parsed = parse("{{ . }}").unwrap();
        assert_eq!(parsed.body[0], Node::Output(Expr::Var(vec![])));
    }

    #[test]
    fn test_parse_call_with_nested_args() {
        let parsed = parse(r#"{{ sort "Meta.date" "desc" (sources "Path" "/news/*") }}"#).unwrap();
        let Node::Output(Expr::Call { name, args }) = &parsed.body[0] else {
            panic!("expected a call");
        };
        assert_eq!(name, "sort");
        assert_eq!(args.len(), 3);
        assert!(matches!(&args[2], Expr::Call { name, args } if name == "sources" && args.len() == 2));
    }

    #[test]
    fn test_parse_if_else() {
        let parsed = parse("{{ if .Dev }}dev{{ else }}prod{{ end }}").unwrap();
        let Node::If {
            then_body,
            else_body,
            ..
        } = &parsed.body[0]
        else {
            panic!("expected if");
        };
        assert_eq!(then_body[0], Node::Text("dev".into()));
        assert_eq!(else_body[0], Node::Text("prod".into()));
    }

    #[test]
    fn test_parse_range() {
        let parsed = parse("{{ range .items }}<li>{{ . }}</li>{{ end }}").unwrap();
        let Node::Range { body, .. } = &parsed.body[0] else {
            panic!("expected range");
        };
        assert_eq!(body.len(), 3);
    }

    #[test]
    fn test_parse_define_and_include() {
        let parsed = parse(r#"{{ define "head" }}<title>x</title>{{ end }}{{ template "head" }}"#)
            .unwrap();
        assert_eq!(parsed.defines.len(), 1);
        assert_eq!(parsed.defines[0].0, "head");
        assert_eq!(
            parsed.body[0],
            Node::Include {
                name: "head".into(),
                arg: None
            }
        );
    }

    #[test]
    fn test_parse_include_with_arg() {
        let parsed = parse(r#"{{ template "item" .Meta }}"#).unwrap();
        assert_eq!(
            parsed.body[0],
            Node::Include {
                name: "item".into(),
                arg: Some(Expr::Var(vec!["Meta".into()]))
            }
        );
    }

    #[test]
    fn test_parse_field_access_on_parenthesized_call() {
        let expr = parse_expr(r#"(data "site.json").author"#).unwrap();
        let Expr::Field { base, path } = expr else {
            panic!("expected field access");
        };
        assert_eq!(path, vec!["author".to_string()]);
        assert!(matches!(*base, Expr::Call { ref name, .. } if name == "data"));
    }

    #[test]
    fn test_parse_negative_int() {
        assert_eq!(parse_expr("-3").unwrap(), Expr::Int(-3));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("{{ if .x }}no end").is_err());
        assert!(parse("{{ unclosed ").is_err());
        assert!(parse("{{ end }}").is_err());
        assert!(parse_expr(r#"sort "a" ("#).is_err());
        assert!(parse_expr("@bad").is_err());
    }

    #[test]
    fn test_nested_blocks() {
        let src = "{{ range .xs }}{{ if . }}y{{ end }}{{ end }}";
        let parsed = parse(src).unwrap();
        let Node::Range { body, .. } = &parsed.body[0] else {
            panic!();
        };
        assert!(matches!(body[0], Node::If { .. }));
    }
}
