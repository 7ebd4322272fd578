//! Text-form placement parser.
//!
//! Accepts the proto-text style used in placement strings:
//!
//! ```text
//! device_tag: "cpu" device_name: "0:0-3" hierarchy { dim: 2 dim: 2 }
//! ```
//!
//! Fields may be separated by whitespace or commas. `device_name` repeats.

use super::{ParallelConf, PlacementError, Result, ShapeProto};

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_separators(&mut self) {
        let trimmed = self
            .rest()
            .trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_separators();
        self.rest().chars().next()
    }

    fn error(&self, msg: impl Into<String>) -> PlacementError {
        PlacementError::Parse {
            offset: self.pos,
            msg: msg.into(),
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        self.skip_separators();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected field name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn string(&mut self) -> Result<String> {
        self.expect('"')?;
        let rest = self.rest();
        let end = rest
            .find('"')
            .ok_or_else(|| self.error("unterminated string"))?;
        self.pos += end + 1;
        Ok(rest[..end].to_string())
    }

    fn int(&mut self) -> Result<i64> {
        self.skip_separators();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '-'))
            .unwrap_or(rest.len());
        let value = rest[..len]
            .parse()
            .map_err(|_| self.error("expected integer"))?;
        self.pos += len;
        Ok(value)
    }
}

pub(super) fn parse_parallel_conf(src: &str) -> Result<ParallelConf> {
    let mut cur = Cursor::new(src);
    let mut conf = ParallelConf::default();
    while cur.peek().is_some() {
        let field = cur.ident()?;
        match field {
            "device_tag" => {
                cur.expect(':')?;
                conf.device_tag = cur.string()?;
            }
            "device_name" => {
                cur.expect(':')?;
                conf.device_name.push(cur.string()?);
            }
            "hierarchy" => {
                if cur.peek() == Some(':') {
                    cur.expect(':')?;
                }
                conf.hierarchy = Some(parse_shape(&mut cur)?);
            }
            other => return Err(cur.error(format!("unknown field `{other}`"))),
        }
    }
    Ok(conf)
}

fn parse_shape(cur: &mut Cursor<'_>) -> Result<ShapeProto> {
    cur.expect('{')?;
    let mut shape = ShapeProto::default();
    while cur.peek() != Some('}') {
        match cur.ident()? {
            "dim" => {
                cur.expect(':')?;
                shape.dim.push(cur.int()?);
            }
            other => return Err(cur.error(format!("unknown shape field `{other}`"))),
        }
    }
    cur.expect('}')?;
    Ok(shape)
}
