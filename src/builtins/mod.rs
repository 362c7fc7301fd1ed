use crate::object::Object;

/// Native functions, in the fixed order that defines their `getBuiltIn`
/// index. The compiler binds names from [`Builtin::ALL`] and the VM maps
/// indices back through the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Puts,
    First,
    Last,
    Rest,
    Push,
}

impl Builtin {
    pub const ALL: [Builtin; 6] = [
        Builtin::Len,
        Builtin::Puts,
        Builtin::First,
        Builtin::Last,
        Builtin::Rest,
        Builtin::Push,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Puts => "puts",
            Builtin::First => "first",
            Builtin::Last => "last",
            Builtin::Rest => "rest",
            Builtin::Push => "push",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Builtin> {
        Builtin::ALL.get(index).copied()
    }

    /// Run the native body. Misuse yields an `Object::Error` value rather
    /// than failing the VM.
    pub fn call(self, args: &[Object]) -> Object {
        match self {
            Builtin::Len => {
                if let Some(err) = check_arity(args, 1) {
                    return err;
                }
                match &args[0] {
                    Object::Str(s) => Object::Integer(s.chars().count() as i64),
                    Object::Array(items) => Object::Integer(items.len() as i64),
                    other => Object::Error(format!(
                        "argument to `len` not supported, got={}",
                        other.type_name()
                    )),
                }
            }
            Builtin::Puts => {
                for arg in args {
                    println!("{}", arg.inspect());
                }
                Object::NULL
            }
            Builtin::First => match single_array(self, args) {
                Ok(items) => items.first().cloned().unwrap_or(Object::NULL),
                Err(err) => err,
            },
            Builtin::Last => match single_array(self, args) {
                Ok(items) => items.last().cloned().unwrap_or(Object::NULL),
                Err(err) => err,
            },
            Builtin::Rest => match single_array(self, args) {
                Ok([]) => Object::NULL,
                Ok([_, rest @ ..]) => Object::array(rest.to_vec()),
                Err(err) => err,
            },
            Builtin::Push => {
                if let Some(err) = check_arity(args, 2) {
                    return err;
                }
                match &args[0] {
                    Object::Array(items) => {
                        let mut extended = Vec::with_capacity(items.len() + 1);
                        extended.extend(items.iter().cloned());
                        extended.push(args[1].clone());
                        Object::array(extended)
                    }
                    other => must_be_array(self, other),
                }
            }
        }
    }
}

fn check_arity(args: &[Object], want: usize) -> Option<Object> {
    (args.len() != want).then(|| {
        Object::Error(format!(
            "wrong number of arguments, got={}, want={}",
            args.len(),
            want
        ))
    })
}

fn must_be_array(builtin: Builtin, got: &Object) -> Object {
    Object::Error(format!(
        "argument to `{}` must be ARRAY, got {}",
        builtin.name(),
        got.type_name()
    ))
}

fn single_array(builtin: Builtin, args: &[Object]) -> Result<&[Object], Object> {
    if let Some(err) = check_arity(args, 1) {
        return Err(err);
    }
    match &args[0] {
        Object::Array(items) => Ok(items.as_slice()),
        other => Err(must_be_array(builtin, other)),
    }
}
