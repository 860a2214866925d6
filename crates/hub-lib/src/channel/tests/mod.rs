mod countersigner;
mod types;
mod validator;
