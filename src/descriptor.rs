use thiserror::Error;

#[derive(Debug, Error)]
#[error("Malformed descriptor `{0}`")]
pub struct DescriptorError(pub String);

/// A method descriptor split into its parameter and return type descriptors. Generic signatures
/// are not handled here, they only ever reach us as opaque strings.
#[derive(Debug)]
pub struct MethodDescriptor<'a> {
    parameters: Vec<&'a str>,
    return_type: &'a str,
}

impl<'a> MethodDescriptor<'a> {
    pub fn parse(descriptor: &'a str) -> Result<Self, DescriptorError> {
        let malformed = || DescriptorError(descriptor.to_string());

        let mut rest = descriptor.strip_prefix('(').ok_or_else(malformed)?;
        let mut parameters = Vec::new();
        while !rest.starts_with(')') {
            let len = field_type_len(rest).ok_or_else(malformed)?;
            parameters.push(&rest[..len]);
            rest = &rest[len..];
        }
        let return_type = &rest[1..];

        if return_type != "V" && field_type_len(return_type) != Some(return_type.len()) {
            return Err(malformed());
        }

        Ok(Self {
            parameters,
            return_type,
        })
    }

    pub fn parameters(&self) -> &[&'a str] {
        &self.parameters
    }

    pub fn return_type(&self) -> Option<&'a str> {
        (self.return_type != "V").then_some(self.return_type)
    }
}

/// Returns the length of the field descriptor at the start of `s`, if there is one.
fn field_type_len(s: &str) -> Option<usize> {
    let dimensions = s.bytes().take_while(|&c| c == b'[').count();
    let len = match s.as_bytes().get(dimensions)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => 1,
        b'L' => s[dimensions..].find(';')? + 1,
        _ => return None,
    };
    Some(dimensions + len)
}

/// The number of local slots a value of this type occupies.
pub fn type_descriptor_width(descriptor: &str) -> usize {
    if matches!(descriptor, "J" | "D") { 2 } else { 1 }
}

/// Strips the package and the `L...;` decoration from a type descriptor or internal name, e.g.
/// `Ljava/lang/String;` and `java/lang/String` both become `String`.
pub fn simple_name(descriptor: &str) -> &str {
    let name = descriptor
        .strip_prefix('L')
        .and_then(|name| name.strip_suffix(';'))
        .unwrap_or(descriptor);
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_parameters() {
        let desc = MethodDescriptor::parse("(IJ[Ljava/lang/String;Z)V").unwrap();
        assert_eq!(desc.parameters(), &["I", "J", "[Ljava/lang/String;", "Z"]);
        assert_eq!(desc.return_type(), None);

        let desc = MethodDescriptor::parse("()Ljava/lang/Object;").unwrap();
        assert!(desc.parameters().is_empty());
        assert_eq!(desc.return_type(), Some("Ljava/lang/Object;"));
    }

    #[test]
    fn reject_malformed() {
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(Ljava/lang/String)V").is_err());
        assert!(MethodDescriptor::parse("(X)V").is_err());
        assert!(MethodDescriptor::parse("()").is_err());
    }

    #[test]
    fn widths_and_names() {
        assert_eq!(type_descriptor_width("J"), 2);
        assert_eq!(type_descriptor_width("[J"), 1);
        assert_eq!(simple_name("Ljava/lang/Test;"), "Test");
        assert_eq!(simple_name("java/lang/Test"), "Test");
        assert_eq!(simple_name("I"), "I");
    }
}
