//! Reply decoding: turning a buffered token run into results.
//!
//! The token consumer buffers data tokens until a done token arrives,
//! then [`handle_done`] partitions the buffer into results driven by
//! the done status flags. Results are returned in arrival order.

use tds5_protocol::token::{Done, DoneStatus, Eed, OrderBy, RowFormat, Token};
use tds5_protocol::value::Value;

use crate::error::Error;

/// One result within a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Row count of a statement without a result set.
    AffectedRows(u64),
    /// A result set with derived column names and row values.
    ResultSet(ResultSet),
    /// Return status and output parameters of a stored procedure.
    Procedure(ProcedureResult),
}

impl QueryResult {
    /// The affected-row count, if this result is one.
    #[must_use]
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            Self::AffectedRows(count) => Some(*count),
            _ => None,
        }
    }

    /// The result set, if this result is one.
    #[must_use]
    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            Self::ResultSet(set) => Some(set),
            _ => None,
        }
    }
}

/// A decoded result set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    /// Column names; the label when the server sent one, the column
    /// name otherwise.
    pub columns: Vec<String>,
    /// 1-based column numbers the server sorted by, when reported.
    pub order_by: Option<Vec<u8>>,
    /// Rows in arrival order.
    pub rows: Vec<Vec<Value>>,
}

/// A decoded stored-procedure result.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureResult {
    /// Procedure return status.
    pub return_status: i32,
    /// Output parameter values.
    pub out_params: Vec<Value>,
}

/// What the consumer should do with its buffer after a done token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// More completion tokens follow; keep the remaining buffer.
    KeepBuffering,
    /// The segment is finished; the buffer can be dropped.
    Completed,
}

/// Apply one done token to the buffered token run.
///
/// Consumes the tokens that contribute to a result, appends the result
/// to `results`, and reports whether the buffer should be retained for
/// a following completion token.
pub(crate) fn handle_done(
    done: &Done,
    buffer: &mut Vec<Token>,
    results: &mut Vec<QueryResult>,
) -> Result<Disposition, Error> {
    let mut produced = false;

    if done.status.contains(DoneStatus::COUNT) {
        let result = match take_row_format(buffer) {
            Some(fmt) => {
                let columns = fmt
                    .columns
                    .iter()
                    .map(|c| c.display_name().to_string())
                    .collect();
                let order_by = take_order_by(buffer).map(|o| o.columns);
                let rows = take_rows(buffer, done.count as usize);
                QueryResult::ResultSet(ResultSet {
                    columns,
                    order_by,
                    rows,
                })
            }
            None => QueryResult::AffectedRows(u64::from(done.count)),
        };
        results.push(result);
        produced = true;
    }

    if done.status.contains(DoneStatus::PROC) {
        // Counts reported by statements inside the procedure are not
        // surfaced; the procedure result replaces them.
        results.retain(|r| !matches!(r, QueryResult::AffectedRows(_)));
        let return_status = take_return_status(buffer).unwrap_or(0);
        let out_params = take_params(buffer).unwrap_or_default();
        results.push(QueryResult::Procedure(ProcedureResult {
            return_status,
            out_params,
        }));
        produced = true;
    }

    if done.status.contains(DoneStatus::ERROR) {
        // TODO: surface only messages of class > 10; lower classes are
        // informational and should not fail the request.
        return Err(match take_eed(buffer) {
            Some(eed) => Error::from_eed(eed),
            None => Error::Protocol("error completion without a server message".to_string()),
        });
    }

    // EVENT, ATTN and TRANS contribute nothing to results.

    if done.status.contains(DoneStatus::MORE) {
        return Ok(Disposition::KeepBuffering);
    }

    if !produced {
        results.push(QueryResult::AffectedRows(u64::from(done.count)));
    }

    Ok(Disposition::Completed)
}

fn take_row_format(buffer: &mut Vec<Token>) -> Option<RowFormat> {
    let index = buffer
        .iter()
        .position(|t| matches!(t, Token::RowFormat(_)))?;
    match buffer.remove(index) {
        Token::RowFormat(fmt) => Some(fmt),
        _ => None,
    }
}

fn take_order_by(buffer: &mut Vec<Token>) -> Option<OrderBy> {
    let index = buffer.iter().position(|t| matches!(t, Token::OrderBy(_)))?;
    match buffer.remove(index) {
        Token::OrderBy(order) => Some(order),
        _ => None,
    }
}

fn take_return_status(buffer: &mut Vec<Token>) -> Option<i32> {
    let index = buffer
        .iter()
        .position(|t| matches!(t, Token::ReturnStatus(_)))?;
    match buffer.remove(index) {
        Token::ReturnStatus(status) => Some(status),
        _ => None,
    }
}

fn take_params(buffer: &mut Vec<Token>) -> Option<Vec<Value>> {
    let index = buffer.iter().position(|t| matches!(t, Token::Params(_)))?;
    match buffer.remove(index) {
        Token::Params(params) => Some(params.values),
        _ => None,
    }
}

fn take_eed(buffer: &mut Vec<Token>) -> Option<Eed> {
    let index = buffer.iter().position(|t| matches!(t, Token::Eed(_)))?;
    match buffer.remove(index) {
        Token::Eed(eed) => Some(eed),
        _ => None,
    }
}

/// Take up to `count` row tokens from the buffer, in arrival order.
fn take_rows(buffer: &mut Vec<Token>, count: usize) -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    let mut index = 0;
    while index < buffer.len() && rows.len() < count {
        if matches!(buffer[index], Token::Row(_)) {
            if let Token::Row(row) = buffer.remove(index) {
                rows.push(row.values);
            }
        } else {
            index += 1;
        }
    }
    rows
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tds5_protocol::token::{ColumnFormat, Params, Row};
    use tds5_protocol::value::DataType;

    fn done(status: DoneStatus, count: u32) -> Done {
        Done {
            status,
            tran_state: 0,
            count,
        }
    }

    fn row_format(names: &[(&str, &str)]) -> Token {
        let columns = names
            .iter()
            .map(|(label, column)| ColumnFormat {
                label_name: (*label).to_string(),
                column_name: (*column).to_string(),
                status: 0,
                user_type: 0,
                datatype: DataType::IntN,
                max_length: 4,
                locale: String::new(),
            })
            .collect();
        Token::RowFormat(RowFormat { columns })
    }

    fn row(values: &[i64]) -> Token {
        Token::Row(Row {
            values: values.iter().copied().map(Value::Int).collect(),
        })
    }

    fn eed(message: &str) -> Token {
        Token::Eed(Eed {
            number: 207,
            state: 4,
            class: 16,
            sql_state: Bytes::new(),
            status: 0,
            tran_state: 0,
            message: message.to_string(),
            server: "sybase1".to_string(),
            procedure: String::new(),
            line: 1,
        })
    }

    /// Drive a sequence of (segment tokens, done) pairs through the
    /// consumer loop the way the connection does.
    fn run(reply: Vec<(Vec<Token>, Done)>) -> Result<Vec<QueryResult>, Error> {
        let mut buffer = Vec::new();
        let mut results = Vec::new();
        for (tokens, done) in reply {
            buffer.extend(tokens);
            match handle_done(&done, &mut buffer, &mut results)? {
                Disposition::KeepBuffering => {}
                Disposition::Completed => buffer.clear(),
            }
        }
        Ok(results)
    }

    #[test]
    fn empty_query_yields_zero_affected_rows() {
        let results = run(vec![(vec![], done(DoneStatus::COUNT, 0))]).unwrap();
        assert_eq!(results, vec![QueryResult::AffectedRows(0)]);
    }

    #[test]
    fn single_row_result_set() {
        let results = run(vec![(
            vec![row_format(&[("", "x")]), row(&[42])],
            done(DoneStatus::COUNT, 1),
        )])
        .unwrap();

        assert_eq!(
            results,
            vec![QueryResult::ResultSet(ResultSet {
                columns: vec!["x".to_string()],
                order_by: None,
                rows: vec![vec![Value::Int(42)]],
            })]
        );
    }

    #[test]
    fn column_labels_win_over_names() {
        let results = run(vec![(
            vec![row_format(&[("total", "t0_sum"), ("", "id")]), row(&[1, 2])],
            done(DoneStatus::COUNT, 1),
        )])
        .unwrap();

        let set = results[0].result_set().unwrap();
        assert_eq!(set.columns, vec!["total".to_string(), "id".to_string()]);
    }

    #[test]
    fn multi_segment_reply_keeps_arrival_order() {
        let results = run(vec![
            (
                vec![row_format(&[("", "a")]), row(&[1])],
                done(DoneStatus::COUNT | DoneStatus::MORE, 1),
            ),
            (
                vec![row_format(&[("", "b")]), row(&[2]), row(&[3])],
                done(DoneStatus::COUNT, 2),
            ),
        ])
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result_set().unwrap().columns, vec!["a"]);
        assert_eq!(
            results[0].result_set().unwrap().rows,
            vec![vec![Value::Int(1)]]
        );
        assert_eq!(results[1].result_set().unwrap().columns, vec!["b"]);
        assert_eq!(
            results[1].result_set().unwrap().rows,
            vec![vec![Value::Int(2)], vec![Value::Int(3)]]
        );
    }

    #[test]
    fn procedure_swallows_intermediate_counts() {
        let results = run(vec![
            (vec![], done(DoneStatus::COUNT | DoneStatus::MORE, 5)),
            (
                vec![
                    Token::ReturnStatus(0),
                    Token::Params(Params {
                        values: vec![Value::Int(99), Value::from("x")],
                    }),
                ],
                done(DoneStatus::COUNT | DoneStatus::PROC, 0),
            ),
        ])
        .unwrap();

        assert_eq!(
            results,
            vec![QueryResult::Procedure(ProcedureResult {
                return_status: 0,
                out_params: vec![Value::Int(99), Value::from("x")],
            })]
        );
    }

    #[test]
    fn procedure_defaults_when_tokens_absent() {
        let results = run(vec![(vec![], done(DoneStatus::PROC, 0))]).unwrap();
        assert_eq!(
            results,
            vec![QueryResult::Procedure(ProcedureResult {
                return_status: 0,
                out_params: vec![],
            })]
        );
    }

    #[test]
    fn error_flag_surfaces_server_message() {
        let err = run(vec![(
            vec![eed("invalid column")],
            done(DoneStatus::COUNT | DoneStatus::ERROR, 0),
        )])
        .unwrap_err();

        match err {
            Error::Server {
                number, message, ..
            } => {
                assert_eq!(number, 207);
                assert_eq!(message, "invalid column");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_flag_without_message_is_a_protocol_error() {
        let err = run(vec![(vec![], done(DoneStatus::ERROR, 0))]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn more_without_count_emits_nothing() {
        let results = run(vec![
            (vec![], done(DoneStatus::MORE, 0)),
            (vec![], done(DoneStatus::COUNT, 3)),
        ])
        .unwrap();
        assert_eq!(results, vec![QueryResult::AffectedRows(3)]);
    }

    #[test]
    fn plain_done_synthesizes_affected_rows() {
        let results = run(vec![(vec![], done(DoneStatus::empty(), 0))]).unwrap();
        assert_eq!(results, vec![QueryResult::AffectedRows(0)]);
    }

    #[test]
    fn order_by_is_attached_to_the_result_set() {
        let results = run(vec![(
            vec![
                row_format(&[("", "x")]),
                Token::OrderBy(OrderBy { columns: vec![1] }),
                row(&[42]),
            ],
            done(DoneStatus::COUNT, 1),
        )])
        .unwrap();

        let set = results[0].result_set().unwrap();
        assert_eq!(set.order_by, Some(vec![1]));
    }

    #[test]
    fn rows_beyond_count_stay_in_buffer() {
        let mut buffer = vec![row_format(&[("", "x")]), row(&[1]), row(&[2])];
        let mut results = Vec::new();
        handle_done(&done(DoneStatus::COUNT, 1), &mut buffer, &mut results).unwrap();

        let set = results[0].result_set().unwrap();
        assert_eq!(set.rows.len(), 1);
        assert_eq!(buffer.len(), 1);
    }
}
