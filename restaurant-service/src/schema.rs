diesel::table! {
    restaurants (id) {
        id -> Uuid,
        name -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    restaurant_products (restaurant_id, product_id) {
        restaurant_id -> Uuid,
        product_id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        available -> Bool,
    }
}

diesel::table! {
    order_approvals (id) {
        id -> Uuid,
        saga_id -> Uuid,
        order_id -> Uuid,
        restaurant_id -> Uuid,
        approval_status -> Varchar,
        failure_messages -> Text,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(restaurant_products -> restaurants (restaurant_id));

diesel::allow_tables_to_appear_in_same_query!(restaurants, restaurant_products, order_approvals);
