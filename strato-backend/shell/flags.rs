use std::collections::HashMap;

/// A flag's default, which also fixes its type: bool flags are switches,
/// string flags consume the following argument.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
}

impl FlagValue {
    pub fn as_bool(&self) -> bool {
        matches!(self, FlagValue::Bool(true))
    }

    pub fn as_str(&self) -> &str {
        match self {
            FlagValue::Str(s) => s,
            FlagValue::Bool(_) => "",
        }
    }
}

pub struct OptionDescriptor {
    pub identifier: &'static str,
    pub aliases: &'static [&'static str],
    pub default: FlagValue,
}

/// Parse `args` against the descriptors. Returns flag values by identifier
/// plus the positional leftovers. Supports long flags (`--delay 5`), short
/// switches grouped (`-rf`), a short value flag in final position of a
/// group (`-d 5`), and `--` to end flag parsing.
pub fn parse_args(
    options: &[OptionDescriptor],
    args: &[String],
) -> Result<(HashMap<&'static str, FlagValue>, Vec<String>), String> {
    let mut mapping: HashMap<&'static str, FlagValue> = HashMap::new();
    let mut leftovers: Vec<String> = Vec::new();

    for option in options {
        if mapping.contains_key(option.identifier) {
            return Err("incorrect config setup: options have duplicate identifiers".into());
        }
        mapping.insert(option.identifier, option.default.clone());
    }

    let find = |name: &str| options.iter().find(|o| o.aliases.contains(&name));

    let mut i = 0;
    while i < args.len() {
        let current = &args[i];
        if current.is_empty() {
            i += 1;
            continue;
        }

        if !current.starts_with('-') || current.len() == 1 {
            leftovers.push(current.clone());
        } else if let Some(rest) = current.strip_prefix("--") {
            if rest.is_empty() {
                // "--": everything after is positional
                leftovers.extend(args[i + 1..].iter().cloned());
                break;
            }
            let option = find(rest).ok_or_else(|| format!("unknown flag: {current:?}"))?;
            match option.default {
                FlagValue::Bool(_) => {
                    mapping.insert(option.identifier, FlagValue::Bool(true));
                }
                FlagValue::Str(_) => {
                    if i == args.len() - 1 {
                        return Err(format!("missing flag value for {current:?}"));
                    }
                    i += 1;
                    mapping.insert(option.identifier, FlagValue::Str(args[i].clone()));
                }
            }
        } else {
            // grouped short flags
            let shorts: Vec<char> = current[1..].chars().collect();
            for (j, c) in shorts.iter().enumerate() {
                let name = c.to_string();
                let option =
                    find(&name).ok_or_else(|| format!("unknown flag: \"-{name}\""))?;
                match option.default {
                    FlagValue::Bool(_) => {
                        mapping.insert(option.identifier, FlagValue::Bool(true));
                    }
                    FlagValue::Str(_) => {
                        if j != shorts.len() - 1 {
                            return Err(format!("error: \"-{name}\" is a value flag"));
                        }
                        if i == args.len() - 1 {
                            return Err(format!("missing flag value for {current:?}"));
                        }
                        i += 1;
                        mapping.insert(option.identifier, FlagValue::Str(args[i].clone()));
                    }
                }
            }
        }
        i += 1;
    }

    Ok((mapping, leftovers))
}
