//! Well-known descriptors.
//!
//! Files like `google/protobuf/timestamp.proto` are assumed to be available to
//! every generator, so images may import them without shipping them. When a
//! caller asks for built-ins to be resolved, the descriptors below stand in.

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

struct BuiltinFile {
  name: &'static str,
  package: &'static str,
  dependencies: &'static [&'static str],
  messages: &'static [BuiltinMessage],
}

struct BuiltinMessage {
  name: &'static str,
  fields: &'static [BuiltinField],
}

/// (name, number, type, type name for message fields, repeated)
type BuiltinField = (&'static str, i32, Type, &'static str, bool);

const fn scalar(name: &'static str, number: i32, ty: Type) -> BuiltinField {
  (name, number, ty, "", false)
}

macro_rules! wrapper {
  ($name:literal, $ty:expr) => {
    BuiltinMessage {
      name: $name,
      fields: &[scalar("value", 1, $ty)],
    }
  };
}

const BUILTINS: &[BuiltinFile] = &[
  BuiltinFile {
    name: "google/protobuf/any.proto",
    package: "google.protobuf",
    dependencies: &[],
    messages: &[BuiltinMessage {
      name: "Any",
      fields: &[scalar("type_url", 1, Type::String), scalar("value", 2, Type::Bytes)],
    }],
  },
  BuiltinFile {
    name: "google/protobuf/timestamp.proto",
    package: "google.protobuf",
    dependencies: &[],
    messages: &[BuiltinMessage {
      name: "Timestamp",
      fields: &[scalar("seconds", 1, Type::Int64), scalar("nanos", 2, Type::Int32)],
    }],
  },
  BuiltinFile {
    name: "google/protobuf/duration.proto",
    package: "google.protobuf",
    dependencies: &[],
    messages: &[BuiltinMessage {
      name: "Duration",
      fields: &[scalar("seconds", 1, Type::Int64), scalar("nanos", 2, Type::Int32)],
    }],
  },
  BuiltinFile {
    name: "google/protobuf/empty.proto",
    package: "google.protobuf",
    dependencies: &[],
    messages: &[BuiltinMessage {
      name: "Empty",
      fields: &[],
    }],
  },
  BuiltinFile {
    name: "google/protobuf/field_mask.proto",
    package: "google.protobuf",
    dependencies: &[],
    messages: &[BuiltinMessage {
      name: "FieldMask",
      fields: &[("paths", 1, Type::String, "", true)],
    }],
  },
  BuiltinFile {
    name: "google/protobuf/wrappers.proto",
    package: "google.protobuf",
    dependencies: &[],
    messages: &[
      wrapper!("DoubleValue", Type::Double),
      wrapper!("FloatValue", Type::Float),
      wrapper!("Int64Value", Type::Int64),
      wrapper!("UInt64Value", Type::Uint64),
      wrapper!("Int32Value", Type::Int32),
      wrapper!("UInt32Value", Type::Uint32),
      wrapper!("BoolValue", Type::Bool),
      wrapper!("StringValue", Type::String),
      wrapper!("BytesValue", Type::Bytes),
    ],
  },
  BuiltinFile {
    name: "google/api/httpbody.proto",
    package: "google.api",
    dependencies: &["google/protobuf/any.proto"],
    messages: &[BuiltinMessage {
      name: "HttpBody",
      fields: &[
        scalar("content_type", 1, Type::String),
        scalar("data", 2, Type::Bytes),
        ("extensions", 3, Type::Message, ".google.protobuf.Any", true),
      ],
    }],
  },
  BuiltinFile {
    name: "google/type/date.proto",
    package: "google.type",
    dependencies: &[],
    messages: &[BuiltinMessage {
      name: "Date",
      fields: &[
        scalar("year", 1, Type::Int32),
        scalar("month", 2, Type::Int32),
        scalar("day", 3, Type::Int32),
      ],
    }],
  },
  BuiltinFile {
    name: "google/type/timeofday.proto",
    package: "google.type",
    dependencies: &[],
    messages: &[BuiltinMessage {
      name: "TimeOfDay",
      fields: &[
        scalar("hours", 1, Type::Int32),
        scalar("minutes", 2, Type::Int32),
        scalar("seconds", 3, Type::Int32),
        scalar("nanos", 4, Type::Int32),
      ],
    }],
  },
];

/// Whether `name` refers to a well-known descriptor.
pub fn is_builtin(name: &str) -> bool {
  BUILTINS.iter().any(|b| b.name == name)
}

/// Names of all well-known descriptors.
pub fn names() -> impl Iterator<Item = &'static str> {
  BUILTINS.iter().map(|b| b.name)
}

/// Build the descriptor for a well-known file.
pub fn lookup(name: &str) -> Option<FileDescriptorProto> {
  let builtin = BUILTINS.iter().find(|b| b.name == name)?;

  Some(FileDescriptorProto {
    name: Some(builtin.name.to_string()),
    package: Some(builtin.package.to_string()),
    dependency: builtin.dependencies.iter().map(|d| d.to_string()).collect(),
    message_type: builtin.messages.iter().map(build_message).collect(),
    syntax: Some("proto3".to_string()),
    ..Default::default()
  })
}

fn build_message(message: &BuiltinMessage) -> DescriptorProto {
  DescriptorProto {
    name: Some(message.name.to_string()),
    field: message
      .fields
      .iter()
      .map(|&(name, number, ty, type_name, repeated)| {
        let label = if repeated { Label::Repeated } else { Label::Optional };
        FieldDescriptorProto {
          name: Some(name.to_string()),
          number: Some(number),
          label: Some(label as i32),
          r#type: Some(ty as i32),
          type_name: (!type_name.is_empty()).then(|| type_name.to_string()),
          json_name: Some(json_name(name)),
          ..Default::default()
        }
      })
      .collect(),
    ..Default::default()
  }
}

/// lowerCamelCase form of a snake_case field name.
fn json_name(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  let mut upper = false;
  for c in name.chars() {
    if c == '_' {
      upper = true;
    } else if upper {
      out.extend(c.to_uppercase());
      upper = false;
    } else {
      out.push(c);
    }
  }
  out
}
