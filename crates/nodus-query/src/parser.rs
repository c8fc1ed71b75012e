//! Recursive-descent query parser
//!
//! Besides building the AST the parser enforces the clause order of a
//! query part (reading clauses, then updating clauses, then `WITH` or
//! `RETURN`), checks that every variable is bound before it is used and
//! validates variable-length hop ranges. Violations are parse errors naming
//! the clause they occur in.

use crate::ast::*;
use crate::lexer::{Spanned, Token, tokenize};
use nodus_core::{Direction, Error, Result};
use std::collections::BTreeSet;

/// Deepest expression nesting accepted by [`parse`]
pub const DEFAULT_MAX_EXPRESSION_DEPTH: usize = 64;

/// Parse a query string into an AST
pub fn parse(source: &str) -> Result<Query> {
    parse_with_depth_limit(source, DEFAULT_MAX_EXPRESSION_DEPTH)
}

/// Parse with an explicit bound on expression nesting
///
/// Parenthesised, list, map and argument nesting, `NOT` and sign prefixes
/// and every operator of a binary chain each count one level.
pub fn parse_with_depth_limit(source: &str, max_depth: usize) -> Result<Query> {
    let tokens = tokenize(source)?;
    Parser::new(source, tokens, max_depth).parse_query()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Reading,
    Updating,
    Finished,
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    /// Clause being parsed, for error messages
    clause: &'static str,
    /// Variables bound so far in the current query part
    scope: BTreeSet<String>,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Spanned>, max_depth: usize) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            clause: "query",
            scope: BTreeSet::new(),
            depth: 0,
            max_depth,
        }
    }

    // ========== Token Helpers ==========

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{token}'")))
        }
    }

    fn location(&self, offset: usize) -> (usize, usize) {
        match Error::syntax(self.source, offset, "") {
            Error::Syntax { line, column, .. } => (line, column),
            _ => (0, 0),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        match self.tokens.get(self.pos) {
            Some(spanned) => {
                let (line, column) = self.location(spanned.span.start);
                Error::parse(
                    self.clause,
                    format!(
                        "{expected}, found '{}' at line {line}, column {column}",
                        spanned.token
                    ),
                )
            }
            None => Error::parse(self.clause, format!("{expected}, found end of input")),
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.clause, message)
    }

    /// Byte offset where the current token starts
    fn current_start(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.span.start)
            .unwrap_or(self.source.len())
    }

    /// Byte offset where the previous token ends
    fn previous_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|s| s.span.end)
            .unwrap_or(0)
    }

    // ========== Names ==========

    fn parse_variable(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Identifier(name)) | Some(Token::EscapedIdentifier(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("expected a variable name")),
        }
    }

    /// Label, type, property key or map key; keywords are accepted as names
    fn parse_symbolic_name(&mut self) -> Result<String> {
        let Some(spanned) = self.tokens.get(self.pos) else {
            return Err(self.unexpected("expected a name"));
        };
        let name = match &spanned.token {
            Token::Identifier(name) | Token::EscapedIdentifier(name) => name.clone(),
            token if token.is_keyword() => self.source[spanned.span.clone()].to_string(),
            _ => return Err(self.unexpected("expected a name")),
        };
        self.pos += 1;
        Ok(name)
    }

    fn is_variable_token(token: Option<&Token>) -> bool {
        matches!(
            token,
            Some(Token::Identifier(_)) | Some(Token::EscapedIdentifier(_))
        )
    }

    // ========== Scope ==========

    fn bind(&mut self, name: &str) {
        self.scope.insert(name.to_string());
    }

    fn check_bound(&self, expr: &Expression) -> Result<()> {
        for name in expr.variables() {
            if !self.scope.contains(&name) {
                return Err(self.error(format!("variable `{name}` not defined")));
            }
        }
        Ok(())
    }

    fn require_bound(&self, name: &str) -> Result<()> {
        if self.scope.contains(name) {
            Ok(())
        } else {
            Err(self.error(format!("variable `{name}` not defined")))
        }
    }

    fn bind_patterns(&mut self, patterns: &[Pattern]) -> Result<()> {
        for pattern in patterns {
            for name in pattern.variables() {
                self.bind(&name);
            }
        }
        for pattern in patterns {
            for node in pattern.nodes() {
                for (_, value) in &node.properties {
                    self.check_bound(value)?;
                }
            }
            for rel in pattern.relationships() {
                for (_, value) in &rel.properties {
                    self.check_bound(value)?;
                }
            }
        }
        Ok(())
    }

    // ========== Query ==========

    fn parse_query(mut self) -> Result<Query> {
        if self.at_end() {
            return Err(self.error("empty query"));
        }

        let mut clauses: Vec<Clause> = Vec::new();
        let mut stage = Stage::Reading;

        while let Some(token) = self.peek().cloned() {
            if stage == Stage::Finished {
                self.clause = "RETURN";
                return Err(self.unexpected("RETURN must be the final clause; expected end of query"));
            }

            let clause = match token {
                Token::Match | Token::Optional | Token::Unwind => {
                    if stage == Stage::Updating {
                        let name = if token == Token::Unwind { "UNWIND" } else { "MATCH" };
                        return Err(Error::parse(
                            name,
                            format!("{name} cannot follow an updating clause without an intervening WITH"),
                        ));
                    }
                    if token == Token::Unwind {
                        self.parse_unwind()?
                    } else {
                        self.parse_match()?
                    }
                }
                Token::With => {
                    stage = Stage::Reading;
                    self.parse_with()?
                }
                Token::Create => {
                    stage = Stage::Updating;
                    self.parse_create()?
                }
                Token::Merge => {
                    stage = Stage::Updating;
                    self.parse_merge()?
                }
                Token::Set => {
                    stage = Stage::Updating;
                    self.clause = "SET";
                    self.pos += 1;
                    Clause::Set(self.parse_set_items()?)
                }
                Token::Remove => {
                    stage = Stage::Updating;
                    self.parse_remove()?
                }
                Token::Delete | Token::Detach => {
                    stage = Stage::Updating;
                    self.parse_delete()?
                }
                Token::Return => {
                    stage = Stage::Finished;
                    self.parse_return()?
                }
                Token::Where => {
                    return Err(Error::parse(
                        "WHERE",
                        "WHERE must directly follow MATCH, OPTIONAL MATCH or WITH",
                    ));
                }
                Token::Order | Token::Skip | Token::Limit => {
                    let name = match token {
                        Token::Order => "ORDER BY",
                        Token::Skip => "SKIP",
                        _ => "LIMIT",
                    };
                    return Err(Error::parse(name, format!("{name} must follow RETURN or WITH")));
                }
                _ => {
                    self.clause = "query";
                    return Err(self.unexpected("expected a clause"));
                }
            };
            clauses.push(clause);
        }

        if let Some(last) = clauses.last() {
            if !matches!(last, Clause::Return(_)) && !last.is_updating() {
                return Err(Error::parse(
                    last.name(),
                    format!(
                        "query cannot conclude with {} (must be RETURN or an update clause)",
                        last.name()
                    ),
                ));
            }
        }

        Ok(Query { clauses })
    }

    // ========== Reading Clauses ==========

    fn parse_match(&mut self) -> Result<Clause> {
        let optional = self.eat(&Token::Optional);
        self.clause = if optional { "OPTIONAL MATCH" } else { "MATCH" };
        self.expect(&Token::Match)?;

        let patterns = self.parse_pattern_list()?;
        self.bind_patterns(&patterns)?;

        let mut hints = Vec::new();
        while self.eat(&Token::Using) {
            self.expect(&Token::Index)?;
            let variable = self.parse_variable()?;
            if !patterns.iter().any(|p| p.variables().contains(&variable)) {
                return Err(self.error(format!(
                    "index hint refers to `{variable}`, which this MATCH does not bind"
                )));
            }
            self.expect(&Token::Colon)?;
            let label = self.parse_symbolic_name()?;
            self.expect(&Token::LParen)?;
            let property = self.parse_symbolic_name()?;
            self.expect(&Token::RParen)?;
            hints.push(IndexHint {
                variable,
                label,
                property,
            });
        }

        let where_clause = if self.eat(&Token::Where) {
            let expr = self.parse_expression()?;
            self.check_bound(&expr)?;
            Some(expr)
        } else {
            None
        };

        Ok(Clause::Match(MatchClause {
            optional,
            patterns,
            hints,
            where_clause,
        }))
    }

    fn parse_unwind(&mut self) -> Result<Clause> {
        self.clause = "UNWIND";
        self.expect(&Token::Unwind)?;
        let expression = self.parse_expression()?;
        self.check_bound(&expression)?;
        self.expect(&Token::As)?;
        let variable = self.parse_variable()?;
        self.bind(&variable);
        Ok(Clause::Unwind(UnwindClause {
            expression,
            variable,
        }))
    }

    fn parse_with(&mut self) -> Result<Clause> {
        self.clause = "WITH";
        self.expect(&Token::With)?;
        let mut projection = self.parse_projection_body()?;

        for item in &projection.items {
            if item.alias.is_none() && !matches!(item.expression, Expression::Variable(_)) {
                return Err(self.error(format!(
                    "expression '{}' in WITH must be aliased (use AS)",
                    item.text
                )));
            }
        }

        let projected: BTreeSet<String> =
            projection.items.iter().map(|i| i.name().to_string()).collect();
        let mut order_scope = self.scope.clone();
        order_scope.extend(projected.iter().cloned());
        self.check_sort_and_paging(&projection, &order_scope)?;

        self.scope = projected;
        if self.eat(&Token::Where) {
            let expr = self.parse_expression()?;
            self.check_bound(&expr)?;
            projection.where_clause = Some(expr);
        }
        Ok(Clause::With(projection))
    }

    fn parse_return(&mut self) -> Result<Clause> {
        self.clause = "RETURN";
        self.expect(&Token::Return)?;
        let projection = self.parse_projection_body()?;

        let mut order_scope = self.scope.clone();
        order_scope.extend(projection.items.iter().map(|i| i.name().to_string()));
        self.check_sort_and_paging(&projection, &order_scope)?;
        Ok(Clause::Return(projection))
    }

    fn check_sort_and_paging(&self, projection: &Projection, scope: &BTreeSet<String>) -> Result<()> {
        for item in &projection.order_by {
            for name in item.expression.variables() {
                if !scope.contains(&name) {
                    return Err(Error::parse("ORDER BY", format!("variable `{name}` not defined")));
                }
            }
        }
        for (clause, expr) in [("SKIP", &projection.skip), ("LIMIT", &projection.limit)] {
            if let Some(expr) = expr {
                if let Some(name) = expr.variables().into_iter().next() {
                    return Err(Error::parse(
                        clause,
                        format!("{clause} cannot refer to variable `{name}`"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_projection_body(&mut self) -> Result<Projection> {
        let distinct = self.eat(&Token::Distinct);
        let mut items = Vec::new();
        let mut star = false;

        if self.eat(&Token::Star) {
            star = true;
            if self.scope.is_empty() {
                return Err(self.error(format!(
                    "{} * is not allowed when there are no variables in scope",
                    self.clause
                )));
            }
            for name in &self.scope {
                items.push(ProjectionItem {
                    expression: Expression::Variable(name.clone()),
                    alias: None,
                    text: name.clone(),
                });
            }
            if !self.eat(&Token::Comma) {
                return self.finish_projection(distinct, star, items);
            }
        }

        loop {
            let start = self.current_start();
            let expression = self.parse_expression()?;
            let text = self.source[start..self.previous_end()].trim().to_string();
            self.check_bound(&expression)?;
            let alias = if self.eat(&Token::As) {
                Some(self.parse_variable()?)
            } else {
                None
            };
            items.push(ProjectionItem {
                expression,
                alias,
                text,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.finish_projection(distinct, star, items)
    }

    fn finish_projection(
        &mut self,
        distinct: bool,
        star: bool,
        items: Vec<ProjectionItem>,
    ) -> Result<Projection> {
        let mut order_by = Vec::new();
        if self.eat(&Token::Order) {
            let outer = self.clause;
            self.clause = "ORDER BY";
            self.expect(&Token::By)?;
            loop {
                let expression = self.parse_expression()?;
                let ascending = if self.eat(&Token::Desc) {
                    false
                } else {
                    self.eat(&Token::Asc);
                    true
                };
                order_by.push(SortItem {
                    expression,
                    ascending,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.clause = outer;
        }

        let skip = if self.eat(&Token::Skip) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let limit = if self.eat(&Token::Limit) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(Projection {
            distinct,
            star,
            items,
            order_by,
            skip,
            limit,
            where_clause: None,
        })
    }

    // ========== Updating Clauses ==========

    fn parse_create(&mut self) -> Result<Clause> {
        self.clause = "CREATE";
        self.expect(&Token::Create)?;
        let patterns = self.parse_pattern_list()?;
        self.bind_patterns(&patterns)?;
        Ok(Clause::Create(CreateClause { patterns }))
    }

    fn parse_merge(&mut self) -> Result<Clause> {
        self.clause = "MERGE";
        self.expect(&Token::Merge)?;
        let pattern = self.parse_pattern()?;
        self.bind_patterns(std::slice::from_ref(&pattern))?;

        let mut on_create = Vec::new();
        let mut on_match = Vec::new();
        while self.eat(&Token::On) {
            let creating = if self.eat(&Token::Create) {
                true
            } else if self.eat(&Token::Match) {
                false
            } else {
                return Err(self.unexpected("expected CREATE or MATCH after ON"));
            };
            self.expect(&Token::Set)?;
            let items = self.parse_set_items()?;
            if creating {
                on_create.extend(items);
            } else {
                on_match.extend(items);
            }
        }

        Ok(Clause::Merge(MergeClause {
            pattern,
            on_create,
            on_match,
        }))
    }

    fn parse_set_items(&mut self) -> Result<Vec<SetItem>> {
        let mut items = Vec::new();
        loop {
            let variable = self.parse_variable()?;
            self.require_bound(&variable)?;
            let item = match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let key = self.parse_symbolic_name()?;
                    self.expect(&Token::Equals)?;
                    let value = self.parse_expression()?;
                    self.check_bound(&value)?;
                    SetItem::Property {
                        variable,
                        key,
                        value,
                    }
                }
                Some(Token::Equals) => {
                    self.pos += 1;
                    let value = self.parse_expression()?;
                    self.check_bound(&value)?;
                    SetItem::Replace { variable, value }
                }
                Some(Token::PlusEquals) => {
                    self.pos += 1;
                    let value = self.parse_expression()?;
                    self.check_bound(&value)?;
                    SetItem::Merge { variable, value }
                }
                Some(Token::Colon) => SetItem::Labels {
                    variable,
                    labels: self.parse_label_list()?,
                },
                _ => return Err(self.unexpected("expected '.', '=', '+=' or ':'")),
            };
            items.push(item);
            if !self.eat(&Token::Comma) {
                return Ok(items);
            }
        }
    }

    fn parse_remove(&mut self) -> Result<Clause> {
        self.clause = "REMOVE";
        self.expect(&Token::Remove)?;
        let mut items = Vec::new();
        loop {
            let variable = self.parse_variable()?;
            self.require_bound(&variable)?;
            let item = if self.eat(&Token::Dot) {
                RemoveItem::Property {
                    variable,
                    key: self.parse_symbolic_name()?,
                }
            } else if self.check(&Token::Colon) {
                RemoveItem::Labels {
                    variable,
                    labels: self.parse_label_list()?,
                }
            } else {
                return Err(self.unexpected("expected '.' or ':'"));
            };
            items.push(item);
            if !self.eat(&Token::Comma) {
                return Ok(Clause::Remove(items));
            }
        }
    }

    fn parse_delete(&mut self) -> Result<Clause> {
        let detach = self.eat(&Token::Detach);
        self.clause = if detach { "DETACH DELETE" } else { "DELETE" };
        self.expect(&Token::Delete)?;
        let mut expressions = Vec::new();
        loop {
            let expr = self.parse_expression()?;
            self.check_bound(&expr)?;
            expressions.push(expr);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Clause::Delete(DeleteClause {
            detach,
            expressions,
        }))
    }

    fn parse_label_list(&mut self) -> Result<Vec<String>> {
        let mut labels = Vec::new();
        while self.eat(&Token::Colon) {
            labels.push(self.parse_symbolic_name()?);
        }
        if labels.is_empty() {
            return Err(self.unexpected("expected ':'"));
        }
        Ok(labels)
    }

    // ========== Patterns ==========

    fn parse_pattern_list(&mut self) -> Result<Vec<Pattern>> {
        let mut patterns = vec![self.parse_pattern()?];
        while self.eat(&Token::Comma) {
            patterns.push(self.parse_pattern()?);
        }
        Ok(patterns)
    }

    fn parse_pattern(&mut self) -> Result<Pattern> {
        let variable = if Self::is_variable_token(self.peek()) && self.peek_at(1) == Some(&Token::Equals)
        {
            let name = self.parse_variable()?;
            self.pos += 1;
            Some(name)
        } else {
            None
        };

        let start = self.parse_node_pattern()?;
        let mut steps = Vec::new();
        while matches!(self.peek(), Some(Token::Minus) | Some(Token::LessThan)) {
            let rel = self.parse_relationship_pattern()?;
            let node = self.parse_node_pattern()?;
            steps.push((rel, node));
        }

        Ok(Pattern {
            variable,
            start,
            steps,
        })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern> {
        self.expect(&Token::LParen)?;
        let variable = if Self::is_variable_token(self.peek()) {
            Some(self.parse_variable()?)
        } else {
            None
        };
        let mut labels = Vec::new();
        while self.eat(&Token::Colon) {
            labels.push(self.parse_symbolic_name()?);
        }
        let properties = if self.check(&Token::LBrace) {
            self.parse_map_entries()?
        } else {
            Vec::new()
        };
        self.expect(&Token::RParen)?;
        Ok(NodePattern {
            variable,
            labels,
            properties,
        })
    }

    fn parse_relationship_pattern(&mut self) -> Result<RelationshipPattern> {
        let points_left = self.eat(&Token::LessThan);
        self.expect(&Token::Minus)?;

        let mut variable = None;
        let mut types = Vec::new();
        let mut length = None;
        let mut properties = Vec::new();

        if self.eat(&Token::LBracket) {
            if Self::is_variable_token(self.peek()) {
                variable = Some(self.parse_variable()?);
            }
            if self.eat(&Token::Colon) {
                types.push(self.parse_symbolic_name()?);
                while self.eat(&Token::Pipe) {
                    self.eat(&Token::Colon);
                    types.push(self.parse_symbolic_name()?);
                }
            }
            if self.eat(&Token::Star) {
                length = Some(self.parse_hop_range()?);
            }
            if self.check(&Token::LBrace) {
                properties = self.parse_map_entries()?;
            }
            self.expect(&Token::RBracket)?;
        }

        self.expect(&Token::Minus)?;
        let points_right = self.eat(&Token::GreaterThan);

        let direction = match (points_left, points_right) {
            (false, true) => Direction::Outgoing,
            (true, false) => Direction::Incoming,
            (false, false) => Direction::Both,
            (true, true) => {
                return Err(self.error("a relationship cannot point in both directions"));
            }
        };

        Ok(RelationshipPattern {
            variable,
            types,
            direction,
            length,
            properties,
        })
    }

    fn parse_hop_bound(&mut self) -> Result<Option<u32>> {
        match self.peek() {
            Some(Token::Integer(n)) => {
                let n = *n;
                self.pos += 1;
                u32::try_from(n)
                    .map(Some)
                    .map_err(|_| self.error(format!("hop bound {n} is out of range")))
            }
            Some(Token::Minus) | Some(Token::Float(_)) => Err(self.error(
                "malformed hop range: bounds must be non-negative integers",
            )),
            _ => Ok(None),
        }
    }

    fn parse_hop_range(&mut self) -> Result<HopRange> {
        let min = self.parse_hop_bound()?;
        let range = if self.eat(&Token::DoubleDot) {
            HopRange {
                min,
                max: self.parse_hop_bound()?,
            }
        } else {
            // `*n` means exactly n hops
            HopRange { min, max: min }
        };

        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                return Err(self.error(format!(
                    "malformed hop range *{min}..{max}: lower bound exceeds upper bound"
                )));
            }
        }
        if !matches!(
            self.peek(),
            Some(Token::RBracket) | Some(Token::LBrace)
        ) {
            return Err(self.unexpected("malformed hop range"));
        }
        Ok(range)
    }

    fn parse_map_entries(&mut self) -> Result<Vec<(String, Expression)>> {
        self.expect(&Token::LBrace)?;
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(entries);
        }
        loop {
            let key = match self.peek() {
                Some(Token::String(s)) => {
                    let s = s.clone();
                    self.pos += 1;
                    s
                }
                _ => self.parse_symbolic_name()?,
            };
            self.expect(&Token::Colon)?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(entries)
    }

    // ========== Expressions ==========

    /// Take one nesting level; parse errors are fatal so levels are only
    /// given back on success
    fn descend(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(self.error(format!(
                "expression nested too deeply (limit {})",
                self.max_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_expression(&mut self) -> Result<Expression> {
        self.descend()?;
        let expr = self.parse_or()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_xor()?;
        while self.eat(&Token::Or) {
            self.descend()?;
            let right = self.parse_xor()?;
            left = Expression::binary(left, BinaryOp::Or, right);
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_xor(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&Token::Xor) {
            self.descend()?;
            let right = self.parse_and()?;
            left = Expression::binary(left, BinaryOp::Xor, right);
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            self.descend()?;
            let right = self.parse_not()?;
            left = Expression::binary(left, BinaryOp::And, right);
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_predicate()?;
        loop {
            let op = match self.peek() {
                Some(Token::Equals) => BinaryOp::Equals,
                Some(Token::NotEquals) => BinaryOp::NotEquals,
                Some(Token::LessThan) => BinaryOp::LessThan,
                Some(Token::LessEquals) => BinaryOp::LessEquals,
                Some(Token::GreaterThan) => BinaryOp::GreaterThan,
                Some(Token::GreaterEquals) => BinaryOp::GreaterEquals,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let right = self.parse_predicate()?;
            left = Expression::binary(left, op, right);
        }
        self.depth = entry;
        Ok(left)
    }

    /// IN, STARTS WITH, ENDS WITH, CONTAINS, IS [NOT] NULL
    fn parse_predicate(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::In) => {
                    self.pos += 1;
                    BinaryOp::In
                }
                Some(Token::Contains) => {
                    self.pos += 1;
                    BinaryOp::Contains
                }
                Some(Token::Starts) => {
                    self.pos += 1;
                    self.expect(&Token::With)?;
                    BinaryOp::StartsWith
                }
                Some(Token::Ends) => {
                    self.pos += 1;
                    self.expect(&Token::With)?;
                    BinaryOp::EndsWith
                }
                Some(Token::Is) => {
                    self.pos += 1;
                    let negated = self.eat(&Token::Not);
                    self.expect(&Token::Null)?;
                    self.descend()?;
                    left = Expression::Unary {
                        op: if negated {
                            UnaryOp::IsNotNull
                        } else {
                            UnaryOp::IsNull
                        },
                        operand: Box::new(left),
                    };
                    continue;
                }
                _ => break,
            };
            self.descend()?;
            let right = self.parse_additive()?;
            left = Expression::binary(left, op, right);
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let right = self.parse_multiplicative()?;
            left = Expression::binary(left, op, right);
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                Some(Token::Percent) => BinaryOp::Modulo,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let right = self.parse_power()?;
            left = Expression::binary(left, op, right);
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut left = self.parse_unary()?;
        while self.eat(&Token::Caret) {
            self.descend()?;
            let right = self.parse_unary()?;
            left = Expression::binary(left, BinaryOp::Power, right);
        }
        self.depth = entry;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.eat(&Token::Minus) {
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(match operand {
                Expression::Literal(Literal::Integer(i)) => Expression::Literal(Literal::Integer(-i)),
                Expression::Literal(Literal::Float(x)) => Expression::Literal(Literal::Float(-x)),
                other => Expression::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(other),
                },
            });
        }
        if self.eat(&Token::Plus) {
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(operand);
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let entry = self.depth;
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    self.descend()?;
                    let key = self.parse_symbolic_name()?;
                    expr = Expression::Property(Box::new(expr), key);
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    self.descend()?;
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expression::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::Colon) if matches!(expr, Expression::Variable(_)) => {
                    let labels = self.parse_label_list()?;
                    expr = Expression::HasLabels(Box::new(expr), labels);
                }
                _ => break,
            }
        }
        self.depth = entry;
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expression> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("expected an expression"));
        };
        let expr = match token {
            Token::Integer(i) => Expression::Literal(Literal::Integer(i)),
            Token::Float(x) => Expression::Literal(Literal::Float(x)),
            Token::String(s) => Expression::Literal(Literal::String(s)),
            Token::True => Expression::Literal(Literal::Boolean(true)),
            Token::False => Expression::Literal(Literal::Boolean(false)),
            Token::Null => Expression::Literal(Literal::Null),
            Token::Parameter(name) => Expression::Parameter(name),
            Token::LParen => {
                self.pos += 1;
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.pos += 1;
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expression()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RBracket)?;
                }
                return Ok(Expression::List(items));
            }
            Token::LBrace => return Ok(Expression::Map(self.parse_map_entries()?)),
            Token::Identifier(name) | Token::EscapedIdentifier(name) => {
                if self.peek_at(1) == Some(&Token::LParen) {
                    return self.parse_function_call(name);
                }
                Expression::Variable(name)
            }
            _ => return Err(self.unexpected("expected an expression")),
        };
        self.advance();
        Ok(expr)
    }

    fn parse_function_call(&mut self, name: String) -> Result<Expression> {
        self.pos += 1;
        self.expect(&Token::LParen)?;
        if name.eq_ignore_ascii_case("count") && self.eat(&Token::Star) {
            self.expect(&Token::RParen)?;
            return Ok(Expression::CountStar);
        }
        let distinct = self.eat(&Token::Distinct);
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }
        Ok(Expression::Function {
            name,
            args,
            distinct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse_err(query: &str) -> (String, String) {
        match parse(query).unwrap_err() {
            Error::Parse { clause, message } => (clause, message),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_match_return() {
        let query = parse("MATCH (p:Person {name: 'Alice'}) RETURN p.age").unwrap();
        assert_eq!(query.clauses.len(), 2);

        let Clause::Match(m) = &query.clauses[0] else {
            panic!("expected MATCH");
        };
        assert!(!m.optional);
        let node = &m.patterns[0].start;
        assert_eq!(node.variable.as_deref(), Some("p"));
        assert_eq!(node.labels, vec!["Person"]);
        assert_eq!(node.properties.len(), 1);

        let Clause::Return(r) = &query.clauses[1] else {
            panic!("expected RETURN");
        };
        assert_eq!(r.items[0].name(), "p.age");
    }

    #[test]
    fn test_column_names_keep_source_text() {
        let query = parse("RETURN abs(-5), sqrt(16) AS root, round(3.14159, 2)").unwrap();
        let Clause::Return(r) = &query.clauses[0] else {
            panic!("expected RETURN");
        };
        let names: Vec<&str> = r.items.iter().map(ProjectionItem::name).collect();
        assert_eq!(names, vec!["abs(-5)", "root", "round(3.14159, 2)"]);
    }

    #[test]
    fn test_relationship_directions_and_ranges() {
        let query = parse("MATCH (a)-[:KNOWS*1..2]->(b)<-[r:LIKES|:LOVES]-(c)-[*]-(d) RETURN b").unwrap();
        let Clause::Match(m) = &query.clauses[0] else {
            panic!("expected MATCH");
        };
        let steps = &m.patterns[0].steps;
        assert_eq!(steps[0].0.direction, Direction::Outgoing);
        assert_eq!(steps[0].0.length, Some(HopRange { min: Some(1), max: Some(2) }));
        assert_eq!(steps[1].0.direction, Direction::Incoming);
        assert_eq!(steps[1].0.types, vec!["LIKES", "LOVES"]);
        assert_eq!(steps[2].0.direction, Direction::Both);
        assert_eq!(steps[2].0.length, Some(HopRange { min: None, max: None }));

        let query = parse("MATCH (a)-[*3]->(b) RETURN b").unwrap();
        let Clause::Match(m) = &query.clauses[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(m.patterns[0].steps[0].0.length, Some(HopRange { min: Some(3), max: Some(3) }));
    }

    #[test]
    fn test_malformed_hop_ranges() {
        let (clause, message) = parse_err("MATCH (a)-[*3..1]->(b) RETURN b");
        assert_eq!(clause, "MATCH");
        assert!(message.contains("hop range"));

        let (clause, _) = parse_err("MATCH (a)-[*-1]->(b) RETURN b");
        assert_eq!(clause, "MATCH");
        let (clause, _) = parse_err("MATCH (a)-[*1..2..3]->(b) RETURN b");
        assert_eq!(clause, "MATCH");
    }

    #[test]
    fn test_operator_precedence() {
        let query = parse("RETURN 1 + 2 * 3 = 7 AND NOT false OR x IS NULL").unwrap_err();
        assert!(matches!(query, Error::Parse { .. }));

        let query = parse("UNWIND [1] AS x RETURN 1 + 2 * 3 = 7 AND NOT false OR x IS NULL").unwrap();
        let Clause::Return(r) = &query.clauses[1] else {
            panic!("expected RETURN");
        };
        let Expression::Binary { op, left, .. } = &r.items[0].expression else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Or);
        let Expression::Binary { op, left, .. } = left.as_ref() else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::And);
        let Expression::Binary { op, left, .. } = left.as_ref() else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Equals);
        let Expression::Binary { op, right, .. } = left.as_ref() else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.as_ref(),
            Expression::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_string_predicates() {
        let query =
            parse("MATCH (n) WHERE n.name STARTS WITH 'A' AND n.name ENDS WITH 'e' AND n.tag IN ['x'] RETURN n")
                .unwrap();
        let Clause::Match(m) = &query.clauses[0] else {
            panic!("expected MATCH");
        };
        let parts = m.where_clause.clone().unwrap().conjuncts();
        assert!(matches!(parts[0], Expression::Binary { op: BinaryOp::StartsWith, .. }));
        assert!(matches!(parts[1], Expression::Binary { op: BinaryOp::EndsWith, .. }));
        assert!(matches!(parts[2], Expression::Binary { op: BinaryOp::In, .. }));
    }

    #[test]
    fn test_updating_clauses() {
        let query = parse(
            "MERGE (p:Person {name: $name}) ON CREATE SET p.created = timestamp() \
             ON MATCH SET p.seen = p.seen + 1, p:Known \
             WITH p MATCH (p)-[r]->(q) SET q += {touched: true} REMOVE q.old, q:Stale \
             DETACH DELETE r",
        )
        .unwrap();
        let Clause::Merge(merge) = &query.clauses[0] else {
            panic!("expected MERGE");
        };
        assert_eq!(merge.on_create.len(), 1);
        assert_eq!(merge.on_match.len(), 2);
        assert!(matches!(query.clauses.last(), Some(Clause::Delete(d)) if d.detach));
        assert!(query.is_updating());
    }

    #[test]
    fn test_clause_order() {
        let (clause, _) = parse_err("RETURN 1 MATCH (n) RETURN n");
        assert_eq!(clause, "RETURN");

        let (clause, _) = parse_err("CREATE (n) MATCH (m) RETURN m");
        assert_eq!(clause, "MATCH");

        let (clause, _) = parse_err("MATCH (n) RETURN n WHERE n.x = 1");
        assert_eq!(clause, "RETURN");

        let (clause, _) = parse_err("MATCH (n)");
        assert_eq!(clause, "MATCH");

        let (clause, _) = parse_err("CREATE (n) WHERE n.x = 1");
        assert_eq!(clause, "WHERE");

        let (clause, _) = parse_err("MATCH (n) LIMIT 1");
        assert_eq!(clause, "LIMIT");

        assert!(parse("CREATE (n) WITH n MATCH (m) RETURN m").is_ok());
    }

    #[test]
    fn test_unbound_variables() {
        let (clause, message) = parse_err("MATCH (n) WHERE m.x = 1 RETURN n");
        assert_eq!(clause, "MATCH");
        assert!(message.contains("`m`"));

        let (clause, _) = parse_err("MATCH (n) WITH n.name AS name RETURN n");
        assert_eq!(clause, "RETURN");

        let (clause, _) = parse_err("CREATE (n) SET m.x = 1");
        assert_eq!(clause, "SET");

        let (clause, _) = parse_err("MATCH (n) WITH n.x RETURN 1");
        assert_eq!(clause, "WITH");

        assert!(parse("MATCH (a), (b {name: a.name}) RETURN b").is_ok());
        assert!(parse("MATCH (n) RETURN n.name AS name ORDER BY n.age DESC").is_ok());
    }

    #[test]
    fn test_return_star_and_distinct() {
        let query = parse("MATCH (a)-[r]->(b) RETURN DISTINCT * ORDER BY a SKIP 1 LIMIT 2").unwrap();
        let Clause::Return(r) = &query.clauses[1] else {
            panic!("expected RETURN");
        };
        assert!(r.distinct && r.star);
        assert_eq!(r.items.len(), 3);
        assert!(r.skip.is_some() && r.limit.is_some());
        assert!(parse("RETURN *").is_err());
    }

    #[test]
    fn test_named_path_and_hints() {
        let query =
            parse("MATCH p = (a:Person)-[:KNOWS]->(b) USING INDEX a:Person(name) WHERE a.name = 'x' RETURN p")
                .unwrap();
        let Clause::Match(m) = &query.clauses[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(m.patterns[0].variable.as_deref(), Some("p"));
        assert_eq!(m.hints[0].label, "Person");
        assert_eq!(m.hints[0].property, "name");
    }

    #[test]
    fn test_keywords_as_names_and_count_star() {
        let query = parse("MATCH (n:`My Label`) RETURN n.index, n.desc, count(*), count(DISTINCT n.on)").unwrap();
        let Clause::Return(r) = &query.clauses[1] else {
            panic!("expected RETURN");
        };
        assert!(matches!(&r.items[0].expression, Expression::Property(_, key) if key == "index"));
        assert_eq!(r.items[2].expression, Expression::CountStar);
        assert!(matches!(&r.items[3].expression, Expression::Function { distinct: true, .. }));
    }

    #[test]
    fn test_syntax_errors_surface() {
        assert!(matches!(parse("MATCH (n) RETURN 'oops"), Err(Error::Syntax { .. })));
        assert!(matches!(parse(""), Err(Error::Parse { .. })));
        let (clause, message) = parse_err("MATCH (n RETURN n");
        assert_eq!(clause, "MATCH");
        assert!(message.contains("line 1"));
    }

    #[test]
    fn test_deep_nesting_is_a_parse_error() {
        let deep = format!("RETURN {}1{} AS x", "(".repeat(10_000), ")".repeat(10_000));
        let (_, message) = parse_err(&deep);
        assert!(message.contains("nested too deeply"), "{message}");

        let unbalanced = format!("RETURN {}", "(".repeat(10_000));
        assert!(matches!(parse(&unbalanced), Err(Error::Parse { .. })));

        for prefix in ["NOT ", "-", "[", "{a: "] {
            let query = format!("RETURN {}1", prefix.repeat(5_000));
            assert!(parse(&query).unwrap_err().is_compile_time(), "{prefix}");
        }

        let chain = format!("RETURN 1{}", " + 1".repeat(5_000));
        assert!(matches!(parse(&chain), Err(Error::Parse { .. })));
        let props = format!("WITH {{}} AS m RETURN m{}", ".k".repeat(5_000));
        assert!(matches!(parse(&props), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_nesting_up_to_the_limit_parses() {
        let at_limit = |depth: usize| {
            format!(
                "RETURN {}1{} AS x",
                "(".repeat(depth - 1),
                ")".repeat(depth - 1)
            )
        };
        assert!(parse(&at_limit(DEFAULT_MAX_EXPRESSION_DEPTH)).is_ok());
        assert!(parse(&at_limit(DEFAULT_MAX_EXPRESSION_DEPTH + 1)).is_err());

        assert!(parse_with_depth_limit(&at_limit(8), 8).is_ok());
        assert!(parse_with_depth_limit(&at_limit(9), 8).is_err());
        assert!(parse_with_depth_limit("RETURN 1 + 2 + 3", 2).is_err());
        assert!(parse_with_depth_limit("RETURN 1 + 2 + 3", 3).is_ok());
    }

    proptest! {
        #[test]
        fn prop_arbitrary_input_never_panics(input in "\\PC{0,80}") {
            let _ = parse(&input);
        }

        #[test]
        fn prop_integer_literals_round_trip(n in 0i64..i64::MAX) {
            let query = parse(&format!("RETURN {n} AS x")).unwrap();
            let Clause::Return(r) = &query.clauses[0] else {
                panic!("expected RETURN");
            };
            prop_assert_eq!(&r.items[0].expression, &Expression::Literal(Literal::Integer(n)));
        }
    }
}
