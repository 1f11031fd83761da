//! A console encoder that renders the message with a pattern, then appends the record's
//! key/value pairs as ` key=value`.

use std::io;

use log::{
    Record,
    kv::{Error, Key, Value, VisitSource},
};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::encode::{Color, Encode, Style, Write};
use serde::Deserialize;

const DEFAULT_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:5})} {t} {m}";

#[derive(Debug, Deserialize)]
pub struct StructuredConsoleEncoderConfig {
    pub pattern: Option<String>,
}

#[derive(Debug)]
pub struct StructuredConsoleEncoder {
    message: PatternEncoder,
}

impl StructuredConsoleEncoder {
    pub fn new(pattern: &str) -> Self {
        Self {
            message: PatternEncoder::new(pattern),
        }
    }
}

impl Encode for StructuredConsoleEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record) -> anyhow::Result<()> {
        self.message.encode(w, record)?;

        let mut pairs = PairWriter { out: w, failed: None };
        if let Err(kv_err) = record.key_values().visit(&mut pairs) {
            match pairs.failed.take() {
                Some(io_err) => return Err(io_err.into()),
                None => write!(w, " [kv error: {}]", kv_err)?,
            }
        }

        w.write_all(b"\n")?;
        Ok(())
    }
}

struct PairWriter<'a> {
    out: &'a mut dyn Write,
    failed: Option<io::Error>,
}

impl PairWriter<'_> {
    fn write_pair(&mut self, key: &Key<'_>, value: &Value<'_>) -> io::Result<()> {
        self.out.set_style(Style::new().text(Color::Cyan))?;
        write!(self.out, " {}=", key)?;
        self.out.set_style(&Style::default())?;

        let rendered = value.to_string();
        if rendered.is_empty() || rendered.contains(char::is_whitespace) {
            write!(self.out, "{:?}", rendered)
        } else {
            write!(self.out, "{}", rendered)
        }
    }
}

impl<'kvs> VisitSource<'kvs> for PairWriter<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), Error> {
        self.write_pair(&key, &value).map_err(|e| {
            self.failed = Some(e);
            Error::msg("io error while writing key/value pairs")
        })
    }
}

pub struct StructuredConsoleEncoderDeserializer;

impl log4rs::config::Deserialize for StructuredConsoleEncoderDeserializer {
    type Trait = dyn Encode;
    type Config = StructuredConsoleEncoderConfig;

    fn deserialize(
        &self,
        config: StructuredConsoleEncoderConfig,
        _: &log4rs::config::Deserializers,
    ) -> anyhow::Result<Box<dyn Encode>> {
        let pattern = config.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        Ok(Box::new(StructuredConsoleEncoder::new(pattern)))
    }
}
