mod store_api_test;
