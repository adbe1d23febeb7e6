diesel::table! {
    payments (id) {
        id -> Int8,
        order_id -> Int8,
        amount -> Numeric,
        status -> Varchar,
        transaction_id -> Nullable<Varchar>,
        payment_method -> Varchar,
        remarks -> Varchar,
        created_at -> Timestamptz,
    }
}
