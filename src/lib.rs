pub mod ast;
pub mod builtins;
pub mod code;
pub mod compiler;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod session;
pub mod vm;
