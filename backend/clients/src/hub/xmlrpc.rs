//! Minimal XML-RPC codec, as spoken by the build hub.

use std::collections::BTreeMap;

use quick_xml::{Reader, escape::escape, events::Event};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Int(i64),
	Bool(bool),
	String(String),
	Double(f64),
	DateTime(String),
	Base64(String),
	Array(Vec<Value>),
	Struct(BTreeMap<String, Value>),
	Nil,
}

impl Value {
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Value::Int(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&[Value]> {
		match self {
			Value::Array(values) => Some(values),
			_ => None,
		}
	}

	pub fn is_nil(&self) -> bool {
		matches!(self, Value::Nil)
	}

	/// Member of a struct value.
	pub fn get(&self, key: &str) -> Option<&Value> {
		match self {
			Value::Struct(members) => members.get(key),
			_ => None,
		}
	}

	/// Keyword arguments, in the `__starstar` convention of the hub.
	pub fn kwargs<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
		let mut members: BTreeMap<String, Value> = pairs
			.into_iter()
			.map(|(key, value)| (key.to_string(), value))
			.collect();
		members.insert("__starstar".to_string(), Value::Bool(true));
		Value::Struct(members)
	}

	fn write(&self, out: &mut String) {
		out.push_str("<value>");
		match self {
			Value::Int(value) => {
				if i32::try_from(*value).is_ok() {
					out.push_str(&format!("<int>{}</int>", value));
				} else {
					out.push_str(&format!("<i8>{}</i8>", value));
				}
			}
			Value::Bool(value) => {
				out.push_str(if *value {
					"<boolean>1</boolean>"
				} else {
					"<boolean>0</boolean>"
				});
			}
			Value::String(value) => {
				out.push_str("<string>");
				out.push_str(&escape(value.as_str()));
				out.push_str("</string>");
			}
			Value::Double(value) => out.push_str(&format!("<double>{}</double>", value)),
			Value::DateTime(value) => {
				out.push_str("<dateTime.iso8601>");
				out.push_str(&escape(value.as_str()));
				out.push_str("</dateTime.iso8601>");
			}
			Value::Base64(value) => {
				out.push_str("<base64>");
				out.push_str(value);
				out.push_str("</base64>");
			}
			Value::Array(values) => {
				out.push_str("<array><data>");
				for value in values {
					value.write(out);
				}
				out.push_str("</data></array>");
			}
			Value::Struct(members) => {
				out.push_str("<struct>");
				for (name, value) in members {
					out.push_str("<member><name>");
					out.push_str(&escape(name.as_str()));
					out.push_str("</name>");
					value.write(out);
					out.push_str("</member>");
				}
				out.push_str("</struct>");
			}
			Value::Nil => out.push_str("<nil/>"),
		}
		out.push_str("</value>");
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Int(value)
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::String(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::String(value)
	}
}

#[derive(Debug, Error)]
pub enum XmlRpcError {
	#[error("fault {code}: {message}")]
	Fault { code: i64, message: String },
	#[error("malformed response: {0}")]
	Malformed(String),
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
	let mut out = String::from("<?xml version=\"1.0\"?><methodCall><methodName>");
	out.push_str(&escape(method));
	out.push_str("</methodName><params>");
	for param in params {
		out.push_str("<param>");
		param.write(&mut out);
		out.push_str("</param>");
	}
	out.push_str("</params></methodCall>");
	out
}

/// Decodes a method response into its only parameter, or its fault.
pub fn decode_response(body: &str) -> Result<Value, XmlRpcError> {
	let mut parser = Parser::new(body);
	parser.expect_start("methodResponse")?;
	match parser.next_tag()? {
		Tag::Start(name) if name == "params" => {
			parser.expect_start("param")?;
			parser.expect_start("value")?;
			let value = parser.value()?;
			parser.expect_end("param")?;
			parser.expect_end("params")?;
			Ok(value)
		}
		Tag::Empty(name) if name == "params" => Ok(Value::Nil),
		Tag::Start(name) if name == "fault" => {
			parser.expect_start("value")?;
			let fault = parser.value()?;
			let code = fault.get("faultCode").and_then(Value::as_i64).unwrap_or(0);
			let message = fault
				.get("faultString")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			Err(XmlRpcError::Fault { code, message })
		}
		tag => Err(XmlRpcError::Malformed(format!("unexpected {:?}", tag))),
	}
}

#[derive(Debug)]
enum Tag {
	Start(String),
	End(String),
	Empty(String),
	Text(String),
}

struct Parser<'a> {
	reader: Reader<&'a [u8]>,
}

impl<'a> Parser<'a> {
	fn new(body: &'a str) -> Self {
		let mut reader = Reader::from_str(body);
		reader.config_mut().trim_text(true);
		Self { reader }
	}

	fn next_tag(&mut self) -> Result<Tag, XmlRpcError> {
		loop {
			let event = self
				.reader
				.read_event()
				.map_err(|error| XmlRpcError::Malformed(error.to_string()))?;
			return Ok(match event {
				Event::Start(tag) => Tag::Start(String::from_utf8_lossy(tag.name().as_ref()).into_owned()),
				Event::End(tag) => Tag::End(String::from_utf8_lossy(tag.name().as_ref()).into_owned()),
				Event::Empty(tag) => Tag::Empty(String::from_utf8_lossy(tag.name().as_ref()).into_owned()),
				Event::Text(text) => Tag::Text(
					text.unescape()
						.map_err(|error| XmlRpcError::Malformed(error.to_string()))?
						.into_owned(),
				),
				Event::CData(data) => Tag::Text(String::from_utf8_lossy(&data.into_inner()).into_owned()),
				Event::Eof => return Err(XmlRpcError::Malformed("unexpected end of document".into())),
				_ => continue,
			});
		}
	}

	fn expect_start(&mut self, name: &str) -> Result<(), XmlRpcError> {
		match self.next_tag()? {
			Tag::Start(found) if found == name => Ok(()),
			tag => Err(XmlRpcError::Malformed(format!("expected <{}>, found {:?}", name, tag))),
		}
	}

	fn expect_end(&mut self, name: &str) -> Result<(), XmlRpcError> {
		match self.next_tag()? {
			Tag::End(found) if found == name => Ok(()),
			tag => Err(XmlRpcError::Malformed(format!("expected </{}>, found {:?}", name, tag))),
		}
	}

	/// Text content up to the end tag `name`, which is consumed.
	fn text(&mut self, name: &str) -> Result<String, XmlRpcError> {
		let mut text = String::new();
		loop {
			match self.next_tag()? {
				Tag::Text(chunk) => text.push_str(&chunk),
				Tag::End(found) if found == name => return Ok(text),
				tag => return Err(XmlRpcError::Malformed(format!("expected text, found {:?}", tag))),
			}
		}
	}

	/// A value whose `<value>` start tag is already consumed.
	fn value(&mut self) -> Result<Value, XmlRpcError> {
		let value = match self.next_tag()? {
			Tag::Text(text) => {
				self.expect_end("value")?;
				return Ok(Value::String(text));
			}
			Tag::End(name) if name == "value" => return Ok(Value::String(String::new())),
			Tag::Empty(name) => match name.as_str() {
				"nil" => Value::Nil,
				"string" => Value::String(String::new()),
				"array" => Value::Array(Vec::new()),
				"struct" => Value::Struct(BTreeMap::new()),
				_ => return Err(XmlRpcError::Malformed(format!("empty <{}/>", name))),
			},
			Tag::Start(name) => match name.as_str() {
				"int" | "i4" | "i8" => {
					let text = self.text(&name)?;
					Value::Int(text.trim().parse().map_err(|_| {
						XmlRpcError::Malformed(format!("invalid integer {:?}", text))
					})?)
				}
				"boolean" => Value::Bool(self.text(&name)?.trim() == "1"),
				"string" => Value::String(self.text(&name)?),
				"double" => {
					let text = self.text(&name)?;
					Value::Double(text.trim().parse().map_err(|_| {
						XmlRpcError::Malformed(format!("invalid double {:?}", text))
					})?)
				}
				"dateTime.iso8601" => Value::DateTime(self.text(&name)?),
				"base64" => Value::Base64(self.text(&name)?),
				"nil" => {
					self.expect_end("nil")?;
					Value::Nil
				}
				"array" => self.array()?,
				"struct" => self.members()?,
				_ => return Err(XmlRpcError::Malformed(format!("unknown type <{}>", name))),
			},
			tag => return Err(XmlRpcError::Malformed(format!("unexpected {:?}", tag))),
		};
		self.expect_end("value")?;
		Ok(value)
	}

	fn array(&mut self) -> Result<Value, XmlRpcError> {
		let mut values = Vec::new();
		match self.next_tag()? {
			Tag::Empty(name) if name == "data" => {}
			Tag::Start(name) if name == "data" => loop {
				match self.next_tag()? {
					Tag::Start(name) if name == "value" => values.push(self.value()?),
					Tag::End(name) if name == "data" => break,
					tag => return Err(XmlRpcError::Malformed(format!("unexpected {:?} in array", tag))),
				}
			},
			tag => return Err(XmlRpcError::Malformed(format!("expected <data>, found {:?}", tag))),
		}
		self.expect_end("array")?;
		Ok(Value::Array(values))
	}

	fn members(&mut self) -> Result<Value, XmlRpcError> {
		let mut members = BTreeMap::new();
		loop {
			match self.next_tag()? {
				Tag::Start(name) if name == "member" => {
					self.expect_start("name")?;
					let key = self.text("name")?;
					self.expect_start("value")?;
					let value = self.value()?;
					self.expect_end("member")?;
					members.insert(key, value);
				}
				Tag::End(name) if name == "struct" => return Ok(Value::Struct(members)),
				tag => return Err(XmlRpcError::Malformed(format!("unexpected {:?} in struct", tag))),
			}
		}
	}
}
