// src/queries.rs

/// Prescribing of the drug codes matching `bnf_pattern`, per CCG, month,
/// code and dose-per-item.
pub fn prescribing_sql(bnf_pattern: &str) -> String {
    format!(
        r#"
SELECT
  pct,
  month,
  bnf_name,
  bnf_code,
  quantity_per_item,
  SUM(items) AS total_items,
  SUM(actual_cost) AS total_cost
FROM
  ebmdatalab.hscic.raw_prescribing_normalised AS rx
INNER JOIN
  hscic.ccgs
ON
  rx.pct = ccgs.code
WHERE
  org_type = 'CCG'
  AND bnf_code LIKE '{bnf_pattern}'
GROUP BY
  pct,
  month,
  bnf_code,
  bnf_name,
  quantity_per_item
ORDER BY
  pct,
  month,
  bnf_code"#
    )
}

/// Average registered list size per CCG and month.
pub const LIST_SIZE_SQL: &str = r#"
SELECT month,
pct_id AS pct,
AVG(total_list_size) AS list_size
FROM ebmdatalab.hscic.practice_statistics
GROUP BY
month, pct
ORDER BY
month, pct,
list_size"#;
