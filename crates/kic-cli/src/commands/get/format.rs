//! Table output

/// Column widths that fit every header and cell
fn column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(headers.len()) {
            widths[i] = widths[i].max(cell.len());
        }
    }
    widths
}

fn format_row<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let line: Vec<String> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let w = widths.get(i).copied().unwrap_or(0);
            format!("{:<width$}", cell.as_ref(), width = w)
        })
        .collect();
    line.join("  ").trim_end().to_string()
}

/// Render a column-aligned table with headers
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths = column_widths(headers, rows);
    let mut out = format_row(headers, &widths);
    for row in rows {
        out.push('\n');
        out.push_str(&format_row(row, &widths));
    }
    out
}

/// Print a column-aligned table with headers
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", render_table(headers, rows));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_to_widest_cell() {
        let table = render_table(
            &["NAME", "ROLE"],
            &[
                vec!["dev-control-plane".to_string(), "control-plane".to_string()],
                vec!["dev-worker".to_string(), "worker".to_string()],
            ],
        );
        assert_eq!(
            table,
            "NAME               ROLE\n\
             dev-control-plane  control-plane\n\
             dev-worker         worker"
        );
    }

    #[test]
    fn empty_table_prints_headers_only() {
        assert_eq!(render_table(&["NAME", "ROLE"], &[]), "NAME  ROLE");
    }
}
