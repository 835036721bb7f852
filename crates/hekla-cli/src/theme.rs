// Nord color palette — https://www.nordtheme.com
//
// Polar Night (structural grays)
pub const NORD3: &str = "\x1b[38;2;76;86;106m";      // comments, dim
// Snow Storm (text)
pub const NORD4: &str = "\x1b[38;2;216;222;233m";    // primary text
// Frost (blues)
pub const NORD7: &str = "\x1b[38;2;143;188;187m";    // teal accent
pub const NORD8: &str = "\x1b[38;2;136;192;208m";    // bright frost
pub const NORD9: &str = "\x1b[38;2;129;161;193m";    // medium blue
// Aurora (accents)
pub const NORD11: &str = "\x1b[38;2;191;97;106m";    // red (errors)
pub const NORD12: &str = "\x1b[38;2;208;135;112m";   // orange (offsets)
pub const NORD13: &str = "\x1b[38;2;235;203;139m";   // yellow (strings)
pub const NORD14: &str = "\x1b[38;2;163;190;140m";   // green (success)
pub const NORD15: &str = "\x1b[38;2;180;142;173m";   // purple (numbers)

pub const BOLD: &str = "\x1b[1m";
pub const R: &str = "\x1b[0m";

// Semantic aliases
pub const TEXT: &str = NORD4;
pub const ERROR: &str = NORD11;
pub const SUCCESS: &str = NORD14;
pub const WARNING: &str = NORD13;
pub const DIM: &str = NORD3;

// Syntax highlighting
pub const KW: &str = NORD9;       // language keywords
pub const TYPE: &str = NORD7;     // built-in value types
pub const STR: &str = NORD13;     // string and char literals
pub const NUM: &str = NORD15;     // numeric literals
pub const OP: &str = NORD9;       // operators, $ and @
pub const COMMENT: &str = NORD3;  // comments
pub const DOT_CMD: &str = NORD7;  // dot commands
pub const HINT: &str = NORD3;     // history hints

// Tree output
pub const OFFSET: &str = NORD12;
pub const PAT_NAME: &str = NORD8;
pub const PAT_TYPE: &str = NORD3;
pub const PAT_VALUE: &str = NORD4;

// Prompt
pub const PROMPT: &str = NORD8;
pub const PROMPT_CONT: &str = NORD3;
