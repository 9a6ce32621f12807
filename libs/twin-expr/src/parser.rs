//! Expression parser
//!
//! Precedence-climbing parser over the token stream. Bracketed references
//! become `Variable` leaves, unless the identifier looks like a model id
//! (`dtmi:` prefix or a `;version` suffix), which becomes a `ModelRef` to be
//! expanded against the twin graph at bind time.
//!
//! The parser advances through the token list monotonically - every token is
//! consumed at most once, so malformed input can only fail, never stall.

use crate::error::{ParseError, ParseResult};
use crate::expr::{AggregateOp, BinaryOp, TokenExpr, UnaryOp, Value};
use crate::token::{scan, Token};

/// Parse expression text into a token tree
pub fn parse(input: &str) -> ParseResult<TokenExpr> {
    let tokens = scan(input)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(t) => Err(ParseError::UnexpectedToken(format!("{:?}", t))),
    }
}

/// True for identifiers that name a model type rather than a point
fn is_model_id(name: &str) -> bool {
    name.starts_with("dtmi:") || name.rsplit_once(';').is_some_and(|(_, v)| v.chars().all(|c| c.is_ascii_digit()) && !v.is_empty())
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> ParseResult<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(ParseError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ParseError::ParenMismatch),
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> ParseResult<TokenExpr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            // Dot binds tightest: property access or model path chaining
            if self.peek() == Some(&Token::Dot) {
                self.pos += 1;
                lhs = self.parse_dotted(lhs)?;
                continue;
            }

            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                Some(Token::Caret) => BinaryOp::Pow,
                Some(Token::Equal) => BinaryOp::Eq,
                Some(Token::NotEqual) => BinaryOp::Ne,
                Some(Token::Less) => BinaryOp::Lt,
                Some(Token::LessEqual) => BinaryOp::Le,
                Some(Token::Greater) => BinaryOp::Gt,
                Some(Token::GreaterEqual) => BinaryOp::Ge,
                Some(Token::And) => BinaryOp::And,
                Some(Token::Or) => BinaryOp::Or,
                // AND / OR as word operators
                Some(Token::Ident(word)) if word.eq_ignore_ascii_case("AND") => BinaryOp::And,
                Some(Token::Ident(word)) if word.eq_ignore_ascii_case("OR") => BinaryOp::Or,
                _ => break,
            };

            let (left_bp, right_bp) = op.binding_power();
            if left_bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(right_bp)?;
            lhs = TokenExpr::binary(op, lhs, rhs);
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> ParseResult<TokenExpr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(TokenExpr::Constant(Value::Double(n))),
            Some(Token::Text(s)) => Ok(TokenExpr::Constant(Value::Text(s))),
            Some(Token::Minus) => {
                let child = self.parse_expr(13)?;
                Ok(TokenExpr::Unary {
                    op: UnaryOp::Minus,
                    child: Box::new(child),
                })
            }
            Some(Token::Not) => {
                let child = self.parse_expr(13)?;
                Ok(TokenExpr::Unary {
                    op: UnaryOp::Not,
                    child: Box::new(child),
                })
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LCurly) => {
                let items = self.parse_args(Token::RCurly)?;
                Ok(TokenExpr::Array(items))
            }
            Some(Token::Reference(name)) => {
                if is_model_id(&name) {
                    Ok(TokenExpr::ModelRef {
                        model_id: name,
                        via: Vec::new(),
                    })
                } else {
                    Ok(TokenExpr::Variable(name))
                }
            }
            Some(Token::Ident(word)) => {
                if word.eq_ignore_ascii_case("true") {
                    return Ok(TokenExpr::Constant(Value::Bool(true)));
                }
                if word.eq_ignore_ascii_case("false") {
                    return Ok(TokenExpr::Constant(Value::Bool(false)));
                }
                if word.eq_ignore_ascii_case("pi") {
                    return Ok(TokenExpr::Constant(Value::Double(std::f64::consts::PI)));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.parse_args(Token::RParen)?;
                    return self.build_call(word, args);
                }
                Ok(TokenExpr::Variable(word))
            }
            Some(t) => Err(ParseError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ParseError::MissingOperand),
        }
    }

    /// Comma separated expressions up to (and consuming) the closing token
    fn parse_args(&mut self, close: Token) -> ParseResult<Vec<TokenExpr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&close) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(t) if t == close => break,
                Some(t) => return Err(ParseError::UnexpectedToken(format!("{:?}", t))),
                None => return Err(ParseError::ParenMismatch),
            }
        }
        Ok(args)
    }

    /// Resolve the expression to the right of a dot
    fn parse_dotted(&mut self, lhs: TokenExpr) -> ParseResult<TokenExpr> {
        match self.next() {
            // [ModelA;1].[ModelB;1] chains a graph traversal path
            Some(Token::Reference(name)) => match lhs {
                TokenExpr::ModelRef { model_id, mut via } if is_model_id(&name) => {
                    via.push(model_id);
                    Ok(TokenExpr::ModelRef {
                        model_id: name,
                        via,
                    })
                }
                other => Ok(TokenExpr::Property {
                    object: Box::new(other),
                    name,
                }),
            },
            Some(Token::Ident(name)) => Ok(TokenExpr::Property {
                object: Box::new(lhs),
                name,
            }),
            Some(t) => Err(ParseError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ParseError::MissingOperand),
        }
    }

    fn build_call(&mut self, name: String, args: Vec<TokenExpr>) -> ParseResult<TokenExpr> {
        let aggregate = |op: AggregateOp, args: Vec<TokenExpr>| -> ParseResult<TokenExpr> {
            if args.len() != 1 {
                return Err(ParseError::BadArity(op.name().to_string(), args.len()));
            }
            let child = args.into_iter().next().unwrap_or(TokenExpr::TRUE);
            Ok(TokenExpr::Aggregate {
                op,
                child: Box::new(child),
            })
        };

        match name.to_ascii_uppercase().as_str() {
            "SUM" => aggregate(AggregateOp::Sum, args),
            "AVERAGE" | "AVG" => aggregate(AggregateOp::Avg, args),
            "MIN" => aggregate(AggregateOp::Min, args),
            "MAX" => aggregate(AggregateOp::Max, args),
            "COUNT" => aggregate(AggregateOp::Count, args),
            "FAILED" => {
                if args.is_empty() || args.len() > 2 {
                    return Err(ParseError::BadArity("FAILED".to_string(), args.len()));
                }
                Ok(TokenExpr::Failed(args))
            }
            "IF" => {
                if args.len() != 3 {
                    return Err(ParseError::BadArity("IF".to_string(), args.len()));
                }
                let mut it = args.into_iter();
                let cond = it.next().unwrap_or(TokenExpr::TRUE);
                let then = it.next().unwrap_or(TokenExpr::TRUE);
                let otherwise = it.next().unwrap_or(TokenExpr::TRUE);
                Ok(TokenExpr::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                })
            }
            _ => Ok(TokenExpr::Function { name, args }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence() {
        let expr = parse("2 + 3 * 4").unwrap();
        assert_eq!(expr.to_string(), "(2 + (3 * 4))");
        let expr = parse("(2 + 3) * 4").unwrap();
        assert_eq!(expr.to_string(), "((2 + 3) * 4)");
    }

    #[test]
    fn parses_point_reference_plus_one() {
        let expr = parse("[calcpoint] + 1").unwrap();
        assert_eq!(expr.to_string(), "(calcpoint + 1)");
    }

    #[test]
    fn parses_comparison_round_trip() {
        let expr = parse("([s1] > 10)").unwrap();
        assert_eq!(expr.to_string(), "(s1 > 10)");
    }

    #[test]
    fn parses_equality_as_single_equals() {
        let expr = parse("([a] = [b])").unwrap();
        assert_eq!(expr.to_string(), "(a = b)");
    }

    #[test]
    fn parses_sum_of_model_reference() {
        let expr = parse("SUM([dtmi:acme:ZoneAirTemperatureSensor;1])").unwrap();
        match expr {
            TokenExpr::Aggregate {
                op: AggregateOp::Sum,
                child,
            } => match *child {
                TokenExpr::ModelRef { ref model_id, ref via } => {
                    assert_eq!(model_id, "dtmi:acme:ZoneAirTemperatureSensor;1");
                    assert!(via.is_empty());
                }
                other => panic!("expected model ref, got {:?}", other),
            },
            other => panic!("expected SUM, got {:?}", other),
        }
    }

    #[test]
    fn parses_model_path_chain() {
        let expr =
            parse("SUM([dtmi:acme:TerminalUnit;1].[dtmi:acme:ZoneAirTemperatureSensor;1])")
                .unwrap();
        match expr {
            TokenExpr::Aggregate { child, .. } => match *child {
                TokenExpr::ModelRef { ref model_id, ref via } => {
                    assert_eq!(model_id, "dtmi:acme:ZoneAirTemperatureSensor;1");
                    assert_eq!(via, &vec!["dtmi:acme:TerminalUnit;1".to_string()]);
                }
                other => panic!("expected chained model ref, got {:?}", other),
            },
            other => panic!("expected SUM, got {:?}", other),
        }
    }

    #[test]
    fn parses_now_second() {
        let expr = parse("NOW.Second").unwrap();
        assert_eq!(expr.to_string(), "NOW.Second");
    }

    #[test]
    fn same_point_twice_binds_two_leaves() {
        let expr = parse("sensor1 + sensor1").unwrap();
        assert_eq!(expr.unbound_variables(), vec!["sensor1", "sensor1"]);
    }

    #[test]
    fn malformed_input_is_an_error_not_a_hang() {
        assert!(parse("(invalid").is_err());
        assert!(parse("").is_err());
        assert!(parse("a + ").is_err());
        assert!(parse("SUM(a, b)").is_err());
        assert!(parse(") a (").is_err());
    }

    #[test]
    fn word_operators() {
        let expr = parse("a > 1 AND b < 2").unwrap();
        assert_eq!(expr.to_string(), "((a > 1) && (b < 2))");
    }

    #[test]
    fn unary_minus() {
        let expr = parse("-a + 1").unwrap();
        assert_eq!(expr.to_string(), "(-a + 1)");
    }

    #[test]
    fn if_requires_three_args() {
        assert!(parse("IF(a, b)").is_err());
        assert!(parse("IF(a > 1, 1, 0)").is_ok());
    }
}
