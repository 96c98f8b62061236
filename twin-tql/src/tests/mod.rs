mod eval_tests;
mod lexer_tests;
mod parser_tests;
