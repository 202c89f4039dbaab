/// AST (Abstract Syntax Tree) module
/// Contains all definitions related to the AST structure
///
/// Submodules:
/// - nodes: Core node definitions for expressions, statements and programs
/// - types: Definitions for type representations in the AST
pub mod nodes;
pub mod types;
